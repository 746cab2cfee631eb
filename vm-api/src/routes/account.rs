use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use vm_core::Actor;
use vm_orchestrator::{Payment, QuotaReport, Subscription, Tenant};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/quota", get(quota))
        .route(
            "/api/v1/subscription",
            get(get_subscription).post(subscribe).put(change_plan),
        )
        .route("/api/v1/payments", get(list_payments))
        .route("/api/v1/payments/{id}/complete", post(complete_payment))
        .route(
            "/api/v1/managed-tenants",
            get(list_managed_tenants).post(add_managed_tenant),
        )
        .route(
            "/api/v1/managed-tenants/{id}",
            delete(remove_managed_tenant),
        )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PlanRequest {
    #[schema(example = "silver")]
    pub plan: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ManagedTenantRequest {
    /// Username of the tenant to bring into the caller's pool
    pub username: String,
}

#[utoipa::path(get, path = "/api/v1/quota", tag = "account",
    responses((status = 200, description = "OK", body = QuotaReport), (status = 402, description = "No active subscription")))]
pub async fn quota(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<QuotaReport>> {
    let report = state.orchestrator.quota(&actor).await?;
    Ok(Json(report))
}

#[utoipa::path(get, path = "/api/v1/subscription", tag = "account",
    responses((status = 200, description = "Current subscription, or null", body = Subscription)))]
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Option<Subscription>>> {
    let subscription = state.orchestrator.subscription(&actor).await?;
    Ok(Json(subscription))
}

/// Checkout: pay for a plan and activate it
#[utoipa::path(post, path = "/api/v1/subscription", tag = "account",
    request_body = PlanRequest,
    responses((status = 200, description = "OK", body = Subscription), (status = 404, description = "Unknown plan")))]
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<Subscription>> {
    let plan = req.plan.trim();
    if plan.is_empty() {
        return Err(ApiError::BadRequest("plan must not be empty".to_string()));
    }
    let subscription = state.orchestrator.subscribe(&actor, plan).await?;
    Ok(Json(subscription))
}

/// Switch the caller's subscription to another plan without checkout
#[utoipa::path(put, path = "/api/v1/subscription", tag = "account",
    request_body = PlanRequest,
    responses(
        (status = 200, description = "OK", body = Subscription),
        (status = 402, description = "No subscription"),
        (status = 404, description = "Unknown plan"),
        (status = 409, description = "Delegated tenant"),
    ))]
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<Subscription>> {
    let plan = req.plan.trim();
    if plan.is_empty() {
        return Err(ApiError::BadRequest("plan must not be empty".to_string()));
    }
    let subscription = state.orchestrator.change_plan(&actor, plan).await?;
    Ok(Json(subscription))
}

#[utoipa::path(get, path = "/api/v1/payments", tag = "account",
    responses((status = 200, description = "OK", body = [Payment])))]
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<Payment>>> {
    let payments = state.orchestrator.list_payments(&actor).await?;
    Ok(Json(payments))
}

#[utoipa::path(post, path = "/api/v1/payments/{id}/complete", tag = "account",
    params(("id" = String, Path, description = "Payment id")),
    responses((status = 200, description = "OK", body = Payment), (status = 409, description = "Already completed")))]
pub async fn complete_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Payment>> {
    let payment = state.orchestrator.complete_payment(&actor, &id).await?;
    Ok(Json(payment))
}

#[utoipa::path(get, path = "/api/v1/managed-tenants", tag = "account",
    responses((status = 200, description = "OK", body = [Tenant])))]
pub async fn list_managed_tenants(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<Tenant>>> {
    let tenants = state.orchestrator.list_managed_tenants(&actor).await?;
    Ok(Json(tenants))
}

#[utoipa::path(post, path = "/api/v1/managed-tenants", tag = "account",
    request_body = ManagedTenantRequest,
    responses((status = 200, description = "OK", body = Tenant), (status = 409, description = "Tenant already has a parent")))]
pub async fn add_managed_tenant(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<ManagedTenantRequest>,
) -> ApiResult<Json<Tenant>> {
    let child = state
        .orchestrator
        .add_managed_tenant(&actor, &req.username)
        .await?;
    Ok(Json(child))
}

#[utoipa::path(delete, path = "/api/v1/managed-tenants/{id}", tag = "account",
    params(("id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "OK", body = Object)))]
pub async fn remove_managed_tenant(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .remove_managed_tenant(&actor, &id)
        .await?;
    Ok(Json(serde_json::json!({ "message": "Managed tenant removed" })))
}
