//! Database file sizes from `sys.master_files`.

use crate::model::FileStorageRecord;
use crate::source::{Connector, Row, SourceError};

use super::queries::STORAGE;
use super::{FailureKind, Monitor, ProbeOutcome};

/// 8 KB pages per megabyte.
const PAGES_PER_MB: f64 = 128.0;

impl<C: Connector> Monitor<C> {
    /// Lists every file of every database visible to the login, in
    /// `(database_id, file_id)` order.
    pub async fn storage(&self) -> ProbeOutcome<Vec<FileStorageRecord>> {
        let result = self
            .fetch(STORAGE)
            .await
            .and_then(|rows| rows.iter().map(storage_record).collect::<Result<Vec<_>, _>>());
        ProbeOutcome::from_result(FailureKind::StorageFailed, result)
    }
}

fn storage_record(row: &Row) -> Result<FileStorageRecord, SourceError> {
    let pages = row.f64(4)?.unwrap_or(0.0).max(0.0);
    Ok(FileStorageRecord {
        database_name: row.text_or_empty(0)?,
        file_name: row.text_or_empty(1)?,
        file_type: row.text_or_empty(2)?,
        physical_name: row.text_or_empty(3)?,
        size_mb: pages / PAGES_PER_MB,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::source::mock::MockConnector;

    #[tokio::test]
    async fn one_database_with_data_and_log_file() {
        let connector = MockConnector::new().on(
            "sys.master_files",
            vec![
                row!["Sales", "Sales", "ROWS", "/var/opt/mssql/data/Sales.mdf", 12_800],
                row!["Sales", "Sales_log", "LOG", "/var/opt/mssql/data/Sales_log.ldf", 6_400],
            ],
        );
        let monitor = Monitor::new(connector);

        let files = monitor.storage().await.into_result().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_type, "ROWS");
        assert_eq!(files[0].size_mb, 100.0);
        assert_eq!(files[1].file_name, "Sales_log");
        assert_eq!(files[1].size_mb, 50.0);
        assert_eq!(files.iter().map(|f| f.size_mb).sum::<f64>(), 150.0);
        assert_eq!(monitor.connector().closed(), 1);
    }

    #[tokio::test]
    async fn size_is_pages_over_128() {
        let pages = [0i64, 1, 127, 129, 1_000_003];
        let rows = pages
            .iter()
            .map(|p| row!["db", "f", "ROWS", "/f", *p])
            .collect();
        let monitor = Monitor::new(MockConnector::new().on("sys.master_files", rows));

        let files = monitor.storage().await.into_result().unwrap();
        for (file, pages) in files.iter().zip(pages) {
            assert_eq!(file.size_mb, pages as f64 / 128.0);
        }
    }

    #[tokio::test]
    async fn null_name_is_empty_string() {
        let monitor = Monitor::new(
            MockConnector::new().on("sys.master_files", vec![row![None::<String>, "f", "LOG", "/f", 8]]),
        );
        let files = monitor.storage().await.into_result().unwrap();
        assert_eq!(files[0].database_name, "");
        assert_eq!(files[0].size_mb, 0.0625);
    }

    #[tokio::test]
    async fn query_error_is_structured() {
        let monitor = Monitor::new(
            MockConnector::new().fail_on("sys.master_files", "The server principal is not able to access the database"),
        );
        let failure = monitor.storage().await.into_result().unwrap_err();
        assert_eq!(failure.error, FailureKind::StorageFailed);
        assert!(failure.detail.contains("not able to access"));
        assert_eq!(monitor.connector().closed(), 1);
    }

    #[tokio::test]
    async fn connection_error_is_structured() {
        let monitor = Monitor::new(MockConnector::new().refuse_connections("connection refused"));
        let failure = monitor.storage().await.into_result().unwrap_err();
        assert_eq!(failure.error, FailureKind::StorageFailed);
        assert_eq!(failure.detail, "connection failed: connection refused");
    }

    #[tokio::test]
    async fn malformed_row_is_structured() {
        let monitor = Monitor::new(
            MockConnector::new().on("sys.master_files", vec![row!["db", "f", "ROWS", "/f", "many"]]),
        );
        let failure = monitor.storage().await.into_result().unwrap_err();
        assert!(failure.detail.contains("column 4"));
    }
}
