//! Health probes over the SQL Server dynamic management views.
//!
//! Each probe opens its own short-lived session through the [`Connector`],
//! runs one or a few statements, normalizes the rows and closes the session:
//!
//! - `resource_usage`: CPU from the scheduler monitor ring buffer, memory from
//!   `sys.dm_os_sys_info` with a `sys.dm_os_process_memory` fallback
//! - `storage`: `sys.master_files`
//! - `top_queries`: `sys.dm_exec_query_stats` + `sys.dm_exec_sql_text`
//! - `last_backup`: `msdb.dbo.backupset`
//! - `invalid_objects`: `sys.sql_expression_dependencies`
//! - `recalculate_statistics`: `sp_updatestats` in every online user database
//!
//! ## Failure handling
//!
//! `resource_usage` never fails: any sub-query error degrades to a default
//! value. Every other probe is total over [`ProbeOutcome`]: connection and
//! query errors become an in-band [`ProbeFailure`] instead of an `Err`.

mod backup;
mod invalid_objects;
mod maintenance;
mod queries;
mod resources;
mod statements;
mod storage;

use std::error::Error as _;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::source::{Connector, Row, Session, SourceError};

pub use maintenance::REFRESH_SUCCESS_MESSAGE;
pub use resources::{DEFAULT_CPU_USAGE, DEFAULT_MEMORY_USAGE};
pub use statements::{DEFAULT_TOP_QUERIES, MAX_QUERY_TEXT_CHARS};

/// Which probe produced a [`ProbeFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StorageFailed,
    TopQueriesFailed,
    LastBackupFailed,
    InvalidObjectsFailed,
    RecalculateFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::StorageFailed => "storage_failed",
            FailureKind::TopQueriesFailed => "top_queries_failed",
            FailureKind::LastBackupFailed => "last_backup_failed",
            FailureKind::InvalidObjectsFailed => "invalid_objects_failed",
            FailureKind::RecalculateFailed => "recalculate_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-band error payload: `{error, detail, trace}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ProbeFailure {
    pub error: FailureKind,
    /// Human-readable error message.
    pub detail: String,
    /// Error value followed by its cause chain, one per line.
    pub trace: String,
}

impl ProbeFailure {
    pub fn from_error(kind: FailureKind, err: &SourceError) -> Self {
        let mut trace = format!("{err:?}");
        let mut cause = err.source();
        while let Some(c) = cause {
            trace.push_str("\ncaused by: ");
            trace.push_str(&c.to_string());
            cause = c.source();
        }
        Self {
            error: kind,
            detail: err.to_string(),
            trace,
        }
    }
}

/// Result of a fallible probe. Serializes as the bare payload on success and
/// as a [`ProbeFailure`] object otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeOutcome<T> {
    Ok(T),
    Failed(ProbeFailure),
}

impl<T> ProbeOutcome<T> {
    pub fn into_result(self) -> Result<T, ProbeFailure> {
        match self {
            ProbeOutcome::Ok(v) => Ok(v),
            ProbeOutcome::Failed(f) => Err(f),
        }
    }

    pub(crate) fn from_result(kind: FailureKind, result: Result<T, SourceError>) -> Self {
        match result {
            Ok(v) => ProbeOutcome::Ok(v),
            Err(e) => {
                warn!(probe = %kind, error = %e, "probe failed");
                ProbeOutcome::Failed(ProbeFailure::from_error(kind, &e))
            }
        }
    }
}

/// Entry point for all probes against one monitored instance.
///
/// Holds only the connector; every call opens and closes its own session, so
/// a `Monitor` can be shared freely between concurrent requests.
#[derive(Debug, Clone)]
pub struct Monitor<C> {
    connector: C,
}

impl<C: Connector> Monitor<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Runs a single query on a fresh session and closes it.
    async fn fetch(&self, sql: &str) -> Result<Vec<Row>, SourceError> {
        let mut session = self.connector.connect().await?;
        let rows = session.query(sql).await;
        session.close().await;
        rows
    }
}
