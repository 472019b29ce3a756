//! HTTP mapping of [`DetectorError`]
//!
//! Error bodies are `{"detail": "<message>"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::utils::error::DetectorError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl DetectorError {
    /// Status code reported to HTTP clients
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for DetectorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
