//! HTTP request handlers for the health endpoints.
//!
//! Every probe endpoint answers `200 OK`. A failed probe is reported in-band
//! as a `{error, detail, trace}` object in place of the normal payload.

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::info;

use sqlpulse_core::probe::DEFAULT_TOP_QUERIES;
use sqlpulse_core::source::Connector;
use sqlpulse_core::{
    BackupRecord, FileStorageRecord, InvalidObjectRecord, ProbeOutcome, QueryCostRecord,
    ResourceUsage, StatisticsRefresh,
};

use crate::state::{AppState, SharedMonitor};

/// Upper bound for `?limit=` on the top queries endpoint.
pub(crate) const MAX_TOP_QUERIES: usize = 100;

/// API routes, without state. The caller attaches the monitor and layers.
pub(crate) fn routes<C: Connector + 'static>() -> Router<SharedMonitor<C>> {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/cpu_memory", get(handle_cpu_memory::<C>))
        .route("/api/v1/storage", get(handle_storage::<C>))
        .route("/api/v1/top_queries", get(handle_top_queries::<C>))
        .route("/api/v1/last_backup", get(handle_last_backup::<C>))
        .route("/api/v1/invalid_objects", get(handle_invalid_objects::<C>))
        .route(
            "/api/v1/recalculate_stats",
            post(handle_recalculate_stats::<C>),
        )
}

// ============================================================
// Health
// ============================================================

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is up", body = String)
    )
)]
pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Probes
// ============================================================

/// CPU and memory utilization. Never reports an error: an unreachable
/// instance reads as 100% CPU and 0% memory.
#[utoipa::path(
    get,
    path = "/api/v1/cpu_memory",
    responses(
        (status = 200, description = "CPU and memory utilization in percent", body = ResourceUsage)
    )
)]
pub(crate) async fn handle_cpu_memory<C: Connector + 'static>(
    State(monitor): AppState<C>,
) -> Json<ResourceUsage> {
    Json(monitor.resource_usage().await)
}

#[utoipa::path(
    get,
    path = "/api/v1/storage",
    responses(
        (status = 200, description = "Size of every data and log file, or a ProbeFailure", body = Vec<FileStorageRecord>)
    )
)]
pub(crate) async fn handle_storage<C: Connector + 'static>(
    State(monitor): AppState<C>,
) -> Json<ProbeOutcome<Vec<FileStorageRecord>>> {
    Json(monitor.storage().await)
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub(crate) struct TopQueriesQuery {
    /// Number of statements to return (default: 5, max: 100).
    limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_TOP_QUERIES)
        .clamp(1, MAX_TOP_QUERIES)
}

#[utoipa::path(
    get,
    path = "/api/v1/top_queries",
    params(TopQueriesQuery),
    responses(
        (status = 200, description = "Most CPU-expensive cached statements, or a ProbeFailure", body = Vec<QueryCostRecord>)
    )
)]
pub(crate) async fn handle_top_queries<C: Connector + 'static>(
    State(monitor): AppState<C>,
    Query(query): Query<TopQueriesQuery>,
) -> Json<ProbeOutcome<Vec<QueryCostRecord>>> {
    Json(monitor.top_queries(clamp_limit(query.limit)).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/last_backup",
    responses(
        (status = 200, description = "Latest full backup per database, or a ProbeFailure", body = Vec<BackupRecord>)
    )
)]
pub(crate) async fn handle_last_backup<C: Connector + 'static>(
    State(monitor): AppState<C>,
) -> Json<ProbeOutcome<Vec<BackupRecord>>> {
    Json(monitor.last_backup().await)
}

#[utoipa::path(
    get,
    path = "/api/v1/invalid_objects",
    responses(
        (status = 200, description = "Modules with unresolved references, or a ProbeFailure", body = Vec<InvalidObjectRecord>)
    )
)]
pub(crate) async fn handle_invalid_objects<C: Connector + 'static>(
    State(monitor): AppState<C>,
) -> Json<ProbeOutcome<Vec<InvalidObjectRecord>>> {
    Json(monitor.invalid_objects().await)
}

// ============================================================
// Maintenance
// ============================================================

/// Runs `sp_updatestats` in every online user database inside one
/// transaction. Slow and lock-heavy.
#[utoipa::path(
    post,
    path = "/api/v1/recalculate_stats",
    responses(
        (status = 200, description = "Refreshed databases, or a ProbeFailure after rollback", body = StatisticsRefresh)
    )
)]
pub(crate) async fn handle_recalculate_stats<C: Connector + 'static>(
    State(monitor): AppState<C>,
) -> Json<ProbeOutcome<StatisticsRefresh>> {
    info!("statistics refresh requested");
    let outcome = monitor.recalculate_statistics().await;
    if let ProbeOutcome::Ok(refresh) = &outcome {
        info!(databases = refresh.databases.len(), "statistics refresh finished");
    }
    Json(outcome)
}
