//! Statistics refresh across all online user databases.
//!
//! The only mutating operation. Runs inside one transaction on one
//! connection:
//!
//! ```text
//! Idle ─► Enumerating ─► Refresh(0) ─► … ─► Refresh(n-1) ─► Committed
//!              │              │                   │
//!              └──────────────┴───────────────────┴──► RolledBack
//! ```
//!
//! No application-level mutual exclusion: concurrent refreshes against the
//! same instance must be serialized by the caller.

use tracing::{info, warn};

use crate::model::StatisticsRefresh;
use crate::source::{Connector, Session, SourceError, quote_identifier};

use super::queries::{
    BEGIN_TRANSACTION, COMMIT_TRANSACTION, ROLLBACK_TRANSACTION, USER_DATABASES,
    build_update_stats_command,
};
use super::{FailureKind, Monitor, ProbeOutcome};

pub const REFRESH_SUCCESS_MESSAGE: &str = "Statistics recalculated successfully";

impl<C: Connector> Monitor<C> {
    /// Runs `sp_updatestats` in every online user database (`database_id > 4`),
    /// in `database_id` order.
    ///
    /// Commits only when every database succeeds. On the first failure the
    /// transaction is rolled back and the outcome is a `recalculate_failed`
    /// payload naming the failing database; no partial database list is
    /// reported. Long-running and lock-heavy: never call it from a read path.
    pub async fn recalculate_statistics(&self) -> ProbeOutcome<StatisticsRefresh> {
        let result = match self.connector.connect().await {
            Ok(mut session) => {
                let result = refresh_in_transaction(&mut session).await;
                session.close().await;
                result
            }
            Err(e) => Err(e),
        };
        ProbeOutcome::from_result(FailureKind::RecalculateFailed, result)
    }
}

async fn refresh_in_transaction<S: Session>(
    session: &mut S,
) -> Result<StatisticsRefresh, SourceError> {
    session.execute(BEGIN_TRANSACTION).await?;

    match refresh_all(session).await {
        Ok(databases) => {
            if let Err(e) = session.execute(COMMIT_TRANSACTION).await {
                rollback(session).await;
                return Err(e);
            }
            info!(count = databases.len(), "statistics refresh committed");
            Ok(StatisticsRefresh {
                message: REFRESH_SUCCESS_MESSAGE.to_string(),
                databases,
            })
        }
        Err(e) => {
            rollback(session).await;
            Err(e)
        }
    }
}

async fn refresh_all<S: Session>(session: &mut S) -> Result<Vec<String>, SourceError> {
    let databases = session
        .query(USER_DATABASES)
        .await?
        .iter()
        .map(|row| row.text_or_empty(0))
        .collect::<Result<Vec<_>, _>>()?;
    let total = databases.len();
    info!(total, "refreshing statistics");

    for (completed, database) in databases.iter().enumerate() {
        let step = match quote_identifier(database) {
            Ok(quoted) => session.execute(&build_update_stats_command(&quoted)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = step {
            warn!(
                database = %database,
                attempted = ?&databases[..=completed],
                error = %e,
                "statistics refresh failed"
            );
            return Err(SourceError::Refresh {
                database: database.clone(),
                completed,
                total,
                source: Box::new(e),
            });
        }
    }
    Ok(databases)
}

async fn rollback<S: Session>(session: &mut S) {
    if let Err(e) = session.execute(ROLLBACK_TRANSACTION).await {
        warn!(error = %e, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::source::mock::MockConnector;

    #[tokio::test]
    async fn refreshes_every_database_and_commits() {
        let connector = MockConnector::new().on("sys.databases", vec![row!["Sales"], row!["HR"]]);
        let monitor = Monitor::new(connector);

        let refresh = monitor.recalculate_statistics().await.into_result().unwrap();
        assert_eq!(refresh.message, REFRESH_SUCCESS_MESSAGE);
        assert_eq!(refresh.databases, vec!["Sales", "HR"]);

        let log = monitor.connector().statements();
        assert_eq!(log[0], BEGIN_TRANSACTION);
        assert!(log[1].contains("sys.databases"));
        assert_eq!(log[2], "EXEC [Sales].sys.sp_updatestats;");
        assert_eq!(log[3], "EXEC [HR].sys.sp_updatestats;");
        assert_eq!(log[4], COMMIT_TRANSACTION);
        assert_eq!(log.len(), 5);
        assert_eq!(monitor.connector().closed(), 1);
    }

    #[tokio::test]
    async fn no_user_databases_commits_empty_list() {
        let monitor = Monitor::new(MockConnector::new().on("sys.databases", vec![]));
        let refresh = monitor.recalculate_statistics().await.into_result().unwrap();
        assert!(refresh.databases.is_empty());
        assert_eq!(monitor.connector().statements().last().unwrap(), COMMIT_TRANSACTION);
    }

    #[tokio::test]
    async fn mid_list_failure_rolls_back_without_partial_list() {
        let connector = MockConnector::new()
            .on("sys.databases", vec![row!["Sales"], row!["HR"], row!["Ops"]])
            .fail_on("[HR].sys.sp_updatestats", "database 'HR' is read-only");
        let monitor = Monitor::new(connector);

        let outcome = monitor.recalculate_statistics().await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], "recalculate_failed");
        assert!(json.get("databases").is_none());
        assert!(json["detail"].as_str().unwrap().contains("[HR] after 1 of 3"));
        assert!(json["trace"].as_str().unwrap().contains("read-only"));

        let log = monitor.connector().statements();
        assert!(!log.iter().any(|s| s.contains("[Ops]")));
        assert!(!log.iter().any(|s| s == COMMIT_TRANSACTION));
        assert_eq!(log.last().unwrap(), ROLLBACK_TRANSACTION);
    }

    #[tokio::test]
    async fn enumeration_failure_rolls_back() {
        let monitor = Monitor::new(MockConnector::new().fail_on("sys.databases", "denied"));
        let failure = monitor.recalculate_statistics().await.into_result().unwrap_err();
        assert_eq!(failure.error, FailureKind::RecalculateFailed);
        assert_eq!(
            monitor.connector().statements().last().unwrap(),
            ROLLBACK_TRANSACTION
        );
    }

    #[tokio::test]
    async fn commit_failure_rolls_back() {
        let monitor = Monitor::new(
            MockConnector::new()
                .on("sys.databases", vec![row!["Sales"]])
                .fail_on("COMMIT", "transaction is doomed"),
        );
        let failure = monitor.recalculate_statistics().await.into_result().unwrap_err();
        assert!(failure.detail.contains("doomed"));
        assert_eq!(
            monitor.connector().statements().last().unwrap(),
            ROLLBACK_TRANSACTION
        );
    }

    #[tokio::test]
    async fn database_names_are_bracket_quoted() {
        let monitor = Monitor::new(
            MockConnector::new().on("sys.databases", vec![row!["odd]name; DROP DATABASE x; --"]]),
        );
        let refresh = monitor.recalculate_statistics().await.into_result().unwrap();
        assert_eq!(refresh.databases, vec!["odd]name; DROP DATABASE x; --"]);
        assert!(
            monitor
                .connector()
                .statements()
                .contains(&"EXEC [odd]]name; DROP DATABASE x; --].sys.sp_updatestats;".to_string())
        );
    }

    #[tokio::test]
    async fn connection_failure_is_structured() {
        let monitor = Monitor::new(MockConnector::new().refuse_connections("login failed"));
        let failure = monitor.recalculate_statistics().await.into_result().unwrap_err();
        assert_eq!(failure.error, FailureKind::RecalculateFailed);
        assert!(monitor.connector().statements().is_empty());
    }
}
