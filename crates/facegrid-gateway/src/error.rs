use std::time::Duration;

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use facegrid_backend::BackendError;
use facegrid_core::CorrelationId;
use serde::Serialize;

/// Why a classification request did not produce a label.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] BackendError),

    #[error("no result for {correlation_id} after {waited:?}")]
    Timeout {
        correlation_id: CorrelationId,
        waited: Duration,
    },

    #[error("classification failed for {0}")]
    ClassificationFailed(CorrelationId),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ClassificationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<MultipartError> for GatewayError {
    fn from(e: MultipartError) -> Self {
        match e.status() {
            StatusCode::PAYLOAD_TOO_LARGE => GatewayError::PayloadTooLarge(e.body_text()),
            _ => GatewayError::InvalidRequest(e.body_text()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
