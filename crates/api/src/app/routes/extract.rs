use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use extractor_core::TaskId;

use crate::app::dto::{ExtractRequest, TaskStartResponse, TaskStatusResponse};
use crate::app::errors;
use crate::app::services::AppState;

/// Validates the request, registers a task and returns at once; the
/// extraction itself runs in the background.
pub async fn start_extraction(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> axum::response::Response {
    let spec = match req.into_spec(&state.defaults) {
        Ok(spec) => spec,
        Err(resp) => return resp,
    };

    let task_id = state.orchestrator.start(spec).await;
    tracing::info!(task_id = %task_id, "extraction task accepted");

    (StatusCode::OK, Json(TaskStartResponse::started(task_id))).into_response()
}

pub async fn task_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(task_id_str): Path<String>,
) -> axum::response::Response {
    let Ok(task_id) = task_id_str.parse::<TaskId>() else {
        return errors::not_found(format!("task {task_id_str} not found"));
    };

    match state.registry().get(task_id).await {
        Ok(task) => Json(TaskStatusResponse::from_task(task, state.expose_diagnostics)).into_response(),
        Err(e) => errors::not_found(e.to_string()),
    }
}
