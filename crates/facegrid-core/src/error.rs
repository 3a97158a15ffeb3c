//! Error types for configuration loading and message decoding.

use thiserror::Error;

/// Errors raised while loading `facegrid.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration `{value}` for `{field}`")]
    InvalidDuration { field: String, value: String },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

/// Errors raised while decoding a queue message body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("result message has no `:` separator: {0:?}")]
    MissingSeparator(String),

    #[error("result message has an empty correlation id: {0:?}")]
    EmptyCorrelationId(String),
}
