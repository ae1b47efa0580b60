//! Latest full backup per database from the msdb backup history.

use crate::model::BackupRecord;
use crate::source::{Connector, Row, SourceError};

use super::queries::LAST_BACKUP;
use super::{FailureKind, Monitor, ProbeOutcome};

impl<C: Connector> Monitor<C> {
    /// Finish time of the most recent full (`type = 'D'`) backup of each
    /// database, in the order the server returns them
    /// (`ORDER BY database_name` under the server collation).
    ///
    /// Databases that never had a full backup are absent from the list rather
    /// than reported with a null timestamp. Requires read access to
    /// `msdb.dbo.backupset`.
    pub async fn last_backup(&self) -> ProbeOutcome<Vec<BackupRecord>> {
        let result = self.fetch(LAST_BACKUP).await.and_then(|rows| latest_per_database(&rows));
        ProbeOutcome::from_result(FailureKind::LastBackupFailed, result)
    }
}

/// One record per database in server order. Repeated names keep their first
/// position and the latest timestamp.
fn latest_per_database(rows: &[Row]) -> Result<Vec<BackupRecord>, SourceError> {
    let mut records: Vec<BackupRecord> = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(name) = row.text(0)? else {
            continue;
        };
        let finished = row.datetime(1)?;
        match records.iter_mut().find(|r| r.database_name == name) {
            Some(record) => record.last_backup = record.last_backup.max(finished),
            None => records.push(BackupRecord {
                database_name: name.to_string(),
                last_backup: finished,
            }),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::source::mock::MockConnector;
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn reports_latest_full_backup() {
        let monitor = Monitor::new(MockConnector::new().on(
            "msdb.dbo.backupset",
            vec![
                row!["Sales", day(2024, 1, 1)],
                row!["Sales", day(2024, 2, 1)],
            ],
        ));

        let records = monitor.last_backup().await.into_result().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].database_name, "Sales");
        assert_eq!(records[0].last_backup, Some(day(2024, 2, 1)));

        let json = serde_json::to_value(&records[0]).unwrap();
        assert!(json["last_backup"].as_str().unwrap().starts_with("2024-02-01T"));
    }

    #[tokio::test]
    async fn keeps_server_collation_order() {
        let monitor = Monitor::new(MockConnector::new().on(
            "msdb.dbo.backupset",
            vec![
                row!["alpha", day(2024, 3, 4)],
                row!["Beta", day(2024, 3, 5)],
                row!["charlie", day(2024, 3, 6)],
            ],
        ));
        let records = monitor.last_backup().await.into_result().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.database_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Beta", "charlie"]);
    }

    #[tokio::test]
    async fn repeated_names_merge_in_first_position() {
        let monitor = Monitor::new(MockConnector::new().on(
            "msdb.dbo.backupset",
            vec![
                row!["HR", day(2024, 3, 1)],
                row!["Sales", day(2024, 3, 2)],
                row!["HR", day(2024, 3, 9)],
            ],
        ));
        let records = monitor.last_backup().await.into_result().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].database_name, "HR");
        assert_eq!(records[0].last_backup, Some(day(2024, 3, 9)));
        assert_eq!(records[1].database_name, "Sales");
    }

    #[tokio::test]
    async fn empty_history_is_empty_list() {
        let monitor = Monitor::new(MockConnector::new().on("msdb.dbo.backupset", vec![]));
        let records = monitor.last_backup().await.into_result().unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn null_finish_date_serializes_as_null() {
        let monitor = Monitor::new(
            MockConnector::new().on("msdb.dbo.backupset", vec![row!["Archive", None::<NaiveDateTime>]]),
        );
        let records = monitor.last_backup().await.into_result().unwrap();
        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json, serde_json::json!([{"database_name": "Archive", "last_backup": null}]));
    }

    #[tokio::test]
    async fn msdb_access_denied_is_structured() {
        let monitor = Monitor::new(MockConnector::new().fail_on(
            "msdb.dbo.backupset",
            "The SELECT permission was denied on the object 'backupset'",
        ));
        let failure = monitor.last_backup().await.into_result().unwrap_err();
        assert_eq!(failure.error, FailureKind::LastBackupFailed);
        assert!(failure.detail.contains("backupset"));
    }
}
