use crate::{error::ApiResult, state::AppState};
use axum::{extract::State, routing::get, Json, Router};
use vm_orchestrator::RatePlan;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/plans", get(list_plans))
}

/// Rate plan catalogue, cheapest first
#[utoipa::path(get, path = "/api/v1/plans", tag = "account",
    responses((status = 200, description = "OK", body = [RatePlan])))]
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<RatePlan>>> {
    let plans = state.orchestrator.list_plans().await?;
    Ok(Json(plans))
}
