//! System endpoints: liveness ping, service metadata and storage health.
//!
//! # Key invariants and assumptions
//! - Health checks are fast and side-effect free.
//! - `info` is built from in-memory state only.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/api/ping",
    tag = "system",
    responses(
        (status = 200, description = "Service is up", body = HealthStatus)
    )
)]
pub(crate) async fn ping() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "pong".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/admin/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Service identity and storage backend", body = SystemInfo)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        service: state.service_name.clone(),
        api_version: state.api_version.clone(),
        storage_backend: state.store.backend_name().to_string(),
        durable_storage: state.store.is_durable(),
    })
}

#[utoipa::path(
    get,
    path = "/admin/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Storage reachable", body = HealthStatus),
        (status = 500, description = "Storage unavailable", body = crate::api::types::ErrorResponse)
    ),
    security(("bearer" = []))
)]
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
