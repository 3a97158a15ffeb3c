//! facegrid-core: shared types for the gateway, worker, and autoscaler.
//!
//! Holds the job and result types that cross the queues, the text codec
//! for queue message bodies, the fleet instance descriptors, and the
//! `facegrid.toml` configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::FacegridConfig;
pub use error::{CodecError, ConfigError};
pub use types::*;
