use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;

/// Multipart field carrying the uploaded image.
pub const INPUT_FIELD: &str = "inputFile";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Results received but not yet claimed by a request.
    pub pending_results: usize,
    /// Jobs on the dead-letter queue; absent when none is configured or the
    /// queue could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered: Option<usize>,
}

/// POST /
///
/// Responds `200` with `"<correlation_id>:<label>"` as plain text.
pub async fn classify(
    State(gateway): State<Arc<Gateway>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<String> {
    let multipart = multipart.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let (name, bytes) = read_input(multipart).await?;
    debug!(input = %name, bytes = bytes.len(), "upload received");
    let result = gateway.handle(&name, bytes).await?;
    Ok(result.to_body())
}

/// Pull the filename and contents of the input field out of the form.
///
/// A body over the router's upload limit surfaces here as a `413`.
async fn read_input(mut multipart: Multipart) -> GatewayResult<(String, Vec<u8>)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(INPUT_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(GatewayError::InvalidRequest("no file selected".to_string()));
        }
        let bytes = field.bytes().await?;
        return Ok((name, bytes.to_vec()));
    }
    Err(GatewayError::InvalidRequest(format!("missing {INPUT_FIELD} field")))
}

/// GET /healthz
pub async fn health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        pending_results: gateway.pending().len().await,
        dead_lettered: gateway.dead_letter_count().await,
    })
}
