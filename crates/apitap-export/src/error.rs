//! Error types for telemetry delivery

use thiserror::Error;

/// Delivery of a single record failed. Logged and dropped, never retried.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, timeout or protocol failure talking to the collector.
    #[error("collector request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The collector answered with a non-2xx status.
    #[error("collector returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A record could not be queued for delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("telemetry queue is full")]
    QueueFull,

    #[error("telemetry dispatcher is shut down")]
    Closed,
}
