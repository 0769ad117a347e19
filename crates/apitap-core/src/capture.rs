//! Bounded body capture.
//!
//! The capturer reads an independent duplicate of a message body, keeps at
//! most `cap` bytes and encodes what it kept with standard base64. The
//! original body is never touched; callers hand in a clone of the buffered
//! [`Bytes`] (cheap, reference counted) or any other [`http_body::Body`].

use crate::error::CaptureError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http_body::Body;
use http_body_util::BodyExt;

/// Which side of the transaction a body belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// The encoded result of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedBody {
    /// Base64 of the kept prefix. Empty when the body was empty.
    pub encoded: String,
    /// Set iff the body was longer than the cap.
    pub truncated: bool,
}

impl CapturedBody {
    /// Capture an already-buffered body.
    pub fn from_bytes(bytes: &[u8], cap: usize) -> Self {
        let truncated = bytes.len() > cap;
        let kept = if truncated { &bytes[..cap] } else { bytes };
        Self {
            encoded: encode_body(kept),
            truncated,
        }
    }

    /// Whether the original body was empty.
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty() && !self.truncated
    }
}

/// Read a body duplicate to the end and capture at most `cap` bytes of it.
///
/// A read error fails the capture; the caller treats that as "no telemetry"
/// for the transaction.
pub async fn capture_body<B>(
    body: B,
    cap: usize,
    direction: Direction,
) -> Result<CapturedBody, CaptureError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = body
        .collect()
        .await
        .map_err(|e| CaptureError::new(direction.as_str(), e))?;
    let bytes = collected.to_bytes();
    Ok(CapturedBody::from_bytes(&bytes, cap))
}

/// Encode raw bytes for transport. Empty input encodes to `""`.
pub fn encode_body(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a body previously produced by [`encode_body`].
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
