//! HTTP surface for the VM hosting orchestrator.
//!
//! Every route maps onto one `VmOrchestrator` operation; the handlers only
//! translate between JSON and the orchestrator's types.

pub mod api_docs;
pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_app;
pub use state::AppState;
