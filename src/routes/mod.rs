pub mod auth;
pub mod stories;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::envelope_failure;
use crate::stories::StoryError;

/// Success side of the wire envelope: `{"success": true, "content": …}`.
pub fn success<T: Serialize>(content: T) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "content": content })),
    )
        .into_response()
}

// The transport mapping of the story envelope. Validation, authorization and
// not-found messages pass through verbatim; store failures are logged here
// and the body carries a generic message.
impl IntoResponse for StoryError {
    fn into_response(self) -> Response {
        match &self {
            StoryError::Store(e) => {
                tracing::error!("Story store error: {}", e);
                envelope_failure(self.status(), "Unknown error")
            }
            _ => envelope_failure(self.status(), &self.to_string()),
        }
    }
}

/// GET /: service banner
pub async fn index() -> Response {
    success(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
