use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API-facing failures, rendered as the `{"error":{"code","message"}}`
/// envelope every endpoint shares.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    InvalidRequest {
        code: &'static str,
        message: String,
    },
    #[error("Audit queue is unavailable.")]
    QueueUnavailable,
    #[error("Summarization is not configured on this server.")]
    SummaryUnavailable,
    #[error("Failed to generate summary: {0}")]
    SummaryFailed(String),
}

impl ApiError {
    pub fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::QueueUnavailable | Self::SummaryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::SummaryFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { code, .. } => code,
            Self::QueueUnavailable => "QUEUE_UNAVAILABLE",
            Self::SummaryUnavailable => "SUMMARY_UNAVAILABLE",
            Self::SummaryFailed(_) => "SUMMARY_FAILED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string()
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
