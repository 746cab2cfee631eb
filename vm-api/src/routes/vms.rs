use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use indexmap::IndexMap;
use serde::Serialize;
use utoipa::ToSchema;
use vm_core::Actor;
use vm_orchestrator::{
    ConfigureVmRequest, ConfiguredVm, CreateVmRequest, CreatedVm, Outcome, TransferVmRequest,
    VirtualMachine,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/vms", get(list_vms).post(create_vm))
        .route("/api/v1/vms/{id}", get(get_vm).delete(delete_vm))
        .route("/api/v1/vms/{id}/start", post(start_vm))
        .route("/api/v1/vms/{id}/stop", post(stop_vm))
        .route("/api/v1/vms/{id}/configure", post(configure_vm))
        .route("/api/v1/vms/{id}/transfer", post(transfer_vm))
        .route("/api/v1/vms/{id}/details", get(vm_details))
        .route("/api/v1/vms/{id}/state", get(vm_state))
        .route("/api/v1/vms/{id}/snapshots", get(list_snapshots))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VmStateResponse {
    pub id: String,
    #[schema(example = "running")]
    pub state: String,
}

#[utoipa::path(get, path = "/api/v1/vms", tag = "vms",
    responses((status = 200, description = "OK", body = [VirtualMachine])))]
pub async fn list_vms(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<VirtualMachine>>> {
    let vms = state.orchestrator.list_vms(&actor).await?;
    Ok(Json(vms))
}

#[utoipa::path(post, path = "/api/v1/vms", tag = "vms",
    request_body = CreateVmRequest,
    responses(
        (status = 200, description = "OK", body = Outcome<CreatedVm>),
        (status = 402, description = "No active subscription"),
        (status = 409, description = "Quota exhausted or name taken"),
        (status = 502, description = "Hypervisor host failure"),
    ))]
pub async fn create_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateVmRequest>,
) -> ApiResult<Json<Outcome<CreatedVm>>> {
    let created = state.orchestrator.create_vm(&actor, req).await?;
    Ok(Json(created))
}

#[utoipa::path(get, path = "/api/v1/vms/{id}", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = VirtualMachine), (status = 404, description = "No such VM")))]
pub async fn get_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<VirtualMachine>> {
    let vm = state.orchestrator.get_vm(&actor, &id).await?;
    Ok(Json(vm))
}

#[utoipa::path(delete, path = "/api/v1/vms/{id}", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = Outcome<VirtualMachine>)))]
pub async fn delete_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<VirtualMachine>>> {
    let deleted = state.orchestrator.delete_vm(&actor, &id).await?;
    Ok(Json(deleted))
}

#[utoipa::path(post, path = "/api/v1/vms/{id}/start", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = Outcome<VirtualMachine>)))]
pub async fn start_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<VirtualMachine>>> {
    let vm = state.orchestrator.start_vm(&actor, &id).await?;
    Ok(Json(vm))
}

#[utoipa::path(post, path = "/api/v1/vms/{id}/stop", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = Outcome<VirtualMachine>)))]
pub async fn stop_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Outcome<VirtualMachine>>> {
    let vm = state.orchestrator.stop_vm(&actor, &id).await?;
    Ok(Json(vm))
}

/// Change CPU count and memory; a running VM is powered off first
#[utoipa::path(post, path = "/api/v1/vms/{id}/configure", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    request_body = ConfigureVmRequest,
    responses((status = 200, description = "OK", body = Outcome<ConfiguredVm>)))]
pub async fn configure_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<ConfigureVmRequest>,
) -> ApiResult<Json<Outcome<ConfiguredVm>>> {
    let configured = state.orchestrator.configure_vm(&actor, &id, req).await?;
    Ok(Json(configured))
}

#[utoipa::path(post, path = "/api/v1/vms/{id}/transfer", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    request_body = TransferVmRequest,
    responses((status = 200, description = "OK", body = VirtualMachine), (status = 404, description = "Unknown recipient")))]
pub async fn transfer_vm(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<TransferVmRequest>,
) -> ApiResult<Json<VirtualMachine>> {
    let vm = state.orchestrator.transfer_vm(&actor, &id, req).await?;
    Ok(Json(vm))
}

/// Human-readable `showvminfo` as an ordered map
#[utoipa::path(get, path = "/api/v1/vms/{id}/details", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = Object)))]
pub async fn vm_details(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<IndexMap<String, String>>> {
    let details = state.orchestrator.vm_details(&actor, &id).await?;
    Ok(Json(details))
}

#[utoipa::path(get, path = "/api/v1/vms/{id}/state", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = VmStateResponse)))]
pub async fn vm_state(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<VmStateResponse>> {
    let power = state.orchestrator.vm_state(&actor, &id).await?;
    Ok(Json(VmStateResponse { id, state: power }))
}

#[utoipa::path(get, path = "/api/v1/vms/{id}/snapshots", tag = "vms",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = [String])))]
pub async fn list_snapshots(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    let snapshots = state.orchestrator.list_snapshots(&actor, &id).await?;
    Ok(Json(snapshots))
}
