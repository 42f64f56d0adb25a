use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}
