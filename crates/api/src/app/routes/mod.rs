use axum::{
    routing::{get, post},
    Router,
};

pub mod extract;
pub mod system;

/// Router for every endpoint the service exposes.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/extract", post(extract::start_extraction))
        .route("/extract/:task_id/status", get(extract::task_status))
}
