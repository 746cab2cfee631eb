use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use vm_core::Actor;
use vm_orchestrator::{Backup, BackupRequest, Outcome};

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/v1/vms/{id}/backups",
        get(list_backups).post(create_backup),
    )
}

/// Backup records for a VM
#[utoipa::path(get, path = "/api/v1/vms/{id}/backups", tag = "backups",
    params(("id" = String, Path, description = "VM id")),
    responses((status = 200, description = "OK", body = [Backup])))]
pub async fn list_backups(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(vm_id): Path<String>,
) -> ApiResult<Json<Vec<Backup>>> {
    let backups = state.orchestrator.list_backups(&actor, &vm_id).await?;
    Ok(Json(backups))
}

/// Snapshot a VM, charged to its owner's backup quota
#[utoipa::path(post, path = "/api/v1/vms/{id}/backups", tag = "backups",
    params(("id" = String, Path, description = "VM id")),
    request_body = BackupRequest,
    responses((status = 200, description = "OK", body = Outcome<Backup>), (status = 409, description = "Backup quota exhausted")))]
pub async fn create_backup(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(vm_id): Path<String>,
    Json(req): Json<BackupRequest>,
) -> ApiResult<Json<Outcome<Backup>>> {
    let backup = state.orchestrator.backup_vm(&actor, &vm_id, req).await?;
    Ok(Json(backup))
}
