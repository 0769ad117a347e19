//! Bounded body buffering
//!
//! The proxy buffers both directions so the telemetry layer can look at a
//! body without consuming it. Every read goes through [`read_body`], which
//! refuses bodies larger than the configured limit.

use bytes::Bytes;
use http::header::{HeaderMap, CONTENT_LENGTH};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;

/// Default buffering limit for a single body: 16MB
pub const DEFAULT_MAX_BUFFERED_BODY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BodyReadError {
    #[error("body exceeds limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read body: {0}")]
    Read(Box<dyn std::error::Error + Send + Sync>),
}

/// Whether a declared `Content-Length` is already over `limit`.
pub fn declared_length_exceeds(headers: &HeaderMap, limit: usize) -> bool {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|length| length > limit as u64)
}

/// Collect `body`, failing with [`BodyReadError::TooLarge`] as soon as more
/// than `limit` bytes have arrived.
pub async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, BodyReadError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(BodyReadError::TooLarge { limit }),
        Err(e) => Err(BodyReadError::Read(e)),
    }
}
