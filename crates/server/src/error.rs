//! HTTP rendering of pipeline errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use textgen_common::TextgenError;
use tracing::{error, warn};

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A [`TextgenError`] on its way to the client
#[derive(Debug)]
pub struct ApiError(pub TextgenError);

impl From<TextgenError> for ApiError {
    fn from(err: TextgenError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
