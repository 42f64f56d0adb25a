//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: shared state and wiring of source, sink and orchestrator
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and mapping to domain types
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use extractor_infra::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppState;

/// Build the router around an already wired [`AppState`].
pub fn build_app(state: AppState) -> Router {
    routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::log_requests))
            .layer(Extension(Arc::new(state))),
    )
}

/// Wire everything from configuration (public entrypoint used by `main.rs`).
pub async fn build_app_from_config(config: &AppConfig) -> anyhow::Result<Router> {
    let state = services::build_state(config).await?;
    Ok(build_app(state))
}
