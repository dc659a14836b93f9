pub mod chat;
pub mod conversations;
pub mod models;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use cg_domain::error::Error;

use crate::state::AppState;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/:request_id/stop", post(chat::stop))
        .route("/v1/conversations/sync", post(conversations::sync))
        .route("/v1/models", get(models::list))
        .with_state(state)
}

/// Map a domain error to a terminal JSON response. The caller always
/// gets a well-formed body; raw upstream payloads never pass through.
pub(crate) fn error_response(e: &Error) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
