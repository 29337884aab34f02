use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Failures that end an analysis request
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Non-image upload, malformed base64 or undecodable bytes
    #[error("{0}")]
    InvalidInput(String),

    #[error("Gemini API call failed: {0:#}")]
    Gateway(anyhow::Error),

    #[error("Failed to parse Gemini response: {0}")]
    UnparsableResponse(String),

    #[error("History store error: {0:#}")]
    Store(anyhow::Error),
}

impl AnalysisError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AnalysisError::Gateway(_)
            | AnalysisError::UnparsableResponse(_)
            | AnalysisError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Rejected request: {}", self);
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
