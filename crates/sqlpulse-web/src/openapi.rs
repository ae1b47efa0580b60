//! OpenAPI documentation definition.

use sqlpulse_core::{
    BackupRecord, FailureKind, FileStorageRecord, InvalidObjectRecord, ProbeFailure,
    QueryCostRecord, ResourceUsage, StatisticsRefresh,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_cpu_memory,
        crate::handlers::handle_storage,
        crate::handlers::handle_top_queries,
        crate::handlers::handle_last_backup,
        crate::handlers::handle_invalid_objects,
        crate::handlers::handle_recalculate_stats,
    ),
    components(schemas(
        ResourceUsage,
        FileStorageRecord,
        QueryCostRecord,
        BackupRecord,
        InvalidObjectRecord,
        StatisticsRefresh,
        ProbeFailure,
        FailureKind,
    )),
    info(
        title = "sqlpulse API",
        version = "1.0",
        description = "SQL Server health monitoring API. Failed probes answer 200 with a ProbeFailure body."
    )
)]
pub(crate) struct ApiDoc;
