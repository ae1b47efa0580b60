//! Result shapes produced by the probes.
//!
//! Everything here is built fresh on each call and serialized as-is by the
//! web layer. With the `api` feature the types also derive `utoipa::ToSchema`.

use chrono::NaiveDateTime;
use serde::Serialize;

/// Point-in-time CPU and memory pressure, both percentages in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ResourceUsage {
    /// Instance CPU usage %, `100 - SystemIdle` of the latest scheduler monitor record.
    pub cpu_usage: f64,
    /// Committed memory as % of the committed target.
    pub memory_usage: f64,
}

/// One physical database file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct FileStorageRecord {
    pub database_name: String,
    /// Logical file name.
    pub file_name: String,
    /// `ROWS`, `LOG`, `FILESTREAM`, ...
    pub file_type: String,
    pub physical_name: String,
    /// File size in MB (8 KB pages / 128).
    pub size_mb: f64,
}

/// A cached statement ranked by cumulative CPU time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct QueryCostRecord {
    /// Total worker time in milliseconds.
    pub cpu_time_ms: f64,
    pub execution_count: i64,
    /// `cpu_time_ms / execution_count`, 0 when never executed.
    pub avg_cpu_time_ms: f64,
    /// Statement text, trimmed and length-limited.
    pub query: String,
}

/// Most recent full backup of a database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct BackupRecord {
    pub database_name: String,
    /// Finish time of the latest full backup (ISO-8601, server local time).
    #[cfg_attr(feature = "api", schema(value_type = Option<String>, format = DateTime))]
    pub last_backup: Option<NaiveDateTime>,
}

/// A module whose body references an object that does not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct InvalidObjectRecord {
    pub schema: String,
    pub object_name: String,
    /// Object type description, e.g. `VIEW` or `SQL_STORED_PROCEDURE`.
    #[serde(rename = "type")]
    pub object_type: String,
    pub missing_reference: String,
}

/// Outcome of a successful statistics refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct StatisticsRefresh {
    pub message: String,
    /// Databases refreshed, in processing order.
    pub databases: Vec<String>,
}
