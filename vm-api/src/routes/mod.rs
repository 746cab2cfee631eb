pub mod account;
pub mod admin;
pub mod backups;
pub mod health;
pub mod plans;
pub mod vms;

use crate::{api_docs::ApiDoc, auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use vm_orchestrator::VmOrchestrator;

pub fn create_app(orchestrator: VmOrchestrator) -> Router {
    let state = AppState::new(orchestrator);

    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    // SwaggerUi also serves the raw document at /api-docs/openapi.json
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(health::routes()) // Health and plan catalogue don't need auth
        .merge(plans::routes())
        .merge(
            vms::routes()
                .merge(backups::routes())
                .merge(account::routes())
                .merge(admin::routes())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
