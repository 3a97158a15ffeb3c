//! facegrid-gateway: synchronous HTTP front for the classification
//! pipeline.
//!
//! Each upload is stored, queued as a job, and the handler blocks until
//! the [`Correlator`] delivers the matching result or the timeout passes.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/` | Classify the multipart `inputFile` upload |
//! | GET | `/healthz` | Liveness, unclaimed results and dead-letter depth |

pub mod correlator;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod pending;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

pub use correlator::{Correlator, CorrelatorSettings};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewaySettings};
pub use pending::PendingResults;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Build the gateway router.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", post(handlers::classify))
        .route("/healthz", get(handlers::health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(gateway)
}
