//! sqlpulse-core: SQL Server health probes.
//!
//! Provides:
//! - `source`: connection provider abstraction (live tiberius connector, scripted mock)
//! - `probe`: the `Monitor` with its read-only probes and the statistics refresh action
//! - `model`: result records returned by the probes
//!
//! With `api` feature:
//! - `utoipa::ToSchema` derives on every result type for OpenAPI generation

pub mod model;
pub mod probe;
pub mod source;

pub use model::{
    BackupRecord, FileStorageRecord, InvalidObjectRecord, QueryCostRecord, ResourceUsage,
    StatisticsRefresh,
};
pub use probe::{FailureKind, Monitor, ProbeFailure, ProbeOutcome};
pub use source::{ConnectionConfig, MssqlConnector};

/// Crate version with the git revision it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");
