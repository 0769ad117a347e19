//! Error types for apitap-core

use thiserror::Error;

/// Result type alias for apitap-core operations
pub type Result<T, E = TapError> = std::result::Result<T, E>;

/// Configuration loading and validation failures.
///
/// All of these surface at startup; nothing here is produced on the request path.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable deserialization failed.
    #[error("configuration error: {0}")]
    Env(#[from] envy::Error),

    /// The collector endpoint is not an absolute http(s) URL.
    #[error("invalid telemetry endpoint `{value}`: {reason}")]
    InvalidEndpoint { value: String, reason: String },

    /// A configured header name is not a valid HTTP header name.
    #[error("invalid header name `{0}` in {1}")]
    InvalidHeaderName(String, &'static str),

    /// A configured URL or address could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    /// A required setting is missing.
    #[error("missing required setting {0}")]
    Missing(&'static str),
}

/// A body capture failed while reading the duplicated stream.
#[derive(Debug, Error)]
#[error("failed to read {direction} body: {source}")]
pub struct CaptureError {
    pub direction: &'static str,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl CaptureError {
    pub fn new(
        direction: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            direction,
            source: source.into(),
        }
    }
}

/// Errors from building or completing a telemetry record.
#[derive(Debug, Error)]
pub enum TapError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The request could not be described (e.g. no host anywhere).
    #[error("cannot build telemetry: {0}")]
    Assembly(String),
}
