//! Maps [`CoordinatorError`] onto the HTTP contract: a thin newtype with a
//! manual `IntoResponse` match on status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dbgrid_core::CoordinatorError;
use serde_json::json;

pub struct ApiError(pub CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_user_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::warn!(error = %self.0, status = status.as_u16(), "request failed");
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}
