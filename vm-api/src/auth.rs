use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use vm_core::Actor;

/// Header set by the authenticating proxy in front of vm-api.
pub const USER_HEADER: &str = "x-vm-user";

/// Auth middleware - resolves the proxy-supplied username to a tenant
///
/// Identity is established upstream; this layer only maps the username to
/// the tenant record and its role. Unknown or missing users get 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let username = req
        .headers()
        .get(USER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", USER_HEADER)))?;

    let tenant = state
        .orchestrator
        .find_tenant_by_username(&username)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown user '{}'", username)))?;

    debug!(user = %tenant.username, role = tenant.role.as_str(), "request authenticated");
    req.extensions_mut().insert::<Actor>(tenant.actor());

    Ok(next.run(req).await)
}
