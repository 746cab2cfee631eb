use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

/// Liveness: the process is serving requests
#[utoipa::path(get, path = "/health", tag = "health",
    responses((status = 200, description = "Service is up", body = Object)))]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "vm-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness: the system of record answers. Hypervisor reachability is
/// not checked here; remote failures surface per request as 502.
#[utoipa::path(get, path = "/health/ready", tag = "health",
    responses(
        (status = 200, description = "Database reachable", body = Object),
        (status = 503, description = "Database unreachable", body = Object),
    ))]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let seeded = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rate_plans")
        .fetch_one(state.orchestrator.pool())
        .await;

    match seeded {
        Ok(plans) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected",
                "plans": plans,
            })),
        ),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "database": "disconnected",
                })),
            )
        }
    }
}
