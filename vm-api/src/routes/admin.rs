use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use vm_core::Actor;
use vm_orchestrator::{AuditEntry, AuditFilter, Payment, Subscription, TenantReport};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/audit", get(audit_log))
        .route("/api/v1/admin/payments", get(list_all_payments))
        .route("/api/v1/admin/tenants", get(list_tenants))
        .route("/api/v1/admin/tenants/{id}", get(get_tenant))
        .route(
            "/api/v1/admin/tenants/{id}/activate",
            post(activate_subscription),
        )
        .route(
            "/api/v1/admin/tenants/{id}/deactivate",
            post(deactivate_subscription),
        )
}

/// Audit trail, newest first
#[utoipa::path(get, path = "/api/v1/admin/audit", tag = "admin",
    params(AuditFilter),
    responses((status = 200, description = "OK", body = [AuditEntry]), (status = 403, description = "Administrator role required")))]
pub async fn audit_log(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state.orchestrator.audit_log(&actor, &filter).await?;
    Ok(Json(entries))
}

#[utoipa::path(get, path = "/api/v1/admin/payments", tag = "admin",
    responses((status = 200, description = "OK", body = [Payment]), (status = 403, description = "Administrator role required")))]
pub async fn list_all_payments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<Payment>>> {
    let payments = state.orchestrator.list_all_payments(&actor).await?;
    Ok(Json(payments))
}

#[utoipa::path(post, path = "/api/v1/admin/tenants/{id}/deactivate", tag = "admin",
    params(("id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "OK", body = Object), (status = 404, description = "No subscription")))]
pub async fn deactivate_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .deactivate_subscription(&actor, &tenant_id)
        .await?;
    Ok(Json(
        serde_json::json!({ "message": "Subscription deactivated" }),
    ))
}

/// Reopen a tenant's subscription with no end date
#[utoipa::path(post, path = "/api/v1/admin/tenants/{id}/activate", tag = "admin",
    params(("id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "OK", body = Subscription), (status = 404, description = "No subscription")))]
pub async fn activate_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .orchestrator
        .activate_subscription(&actor, &tenant_id)
        .await?;
    Ok(Json(subscription))
}

/// Role, payment standing and subscription state of every tenant
#[utoipa::path(get, path = "/api/v1/admin/tenants", tag = "admin",
    responses((status = 200, description = "OK", body = [TenantReport]), (status = 403, description = "Administrator role required")))]
pub async fn list_tenants(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<TenantReport>>> {
    let reports = state.orchestrator.tenant_reports(&actor).await?;
    Ok(Json(reports))
}

#[utoipa::path(get, path = "/api/v1/admin/tenants/{id}", tag = "admin",
    params(("id" = String, Path, description = "Tenant id")),
    responses((status = 200, description = "OK", body = TenantReport), (status = 404, description = "No such tenant")))]
pub async fn get_tenant(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<TenantReport>> {
    let report = state.orchestrator.tenant_report(&actor, &tenant_id).await?;
    Ok(Json(report))
}
