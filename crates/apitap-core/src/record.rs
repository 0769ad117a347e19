//! Telemetry record shipped to the collector.
//!
//! The JSON shape is fixed by the collector: camelCase names, `requestID`
//! spelled with a capital `ID`, headers as an ordered list of `{key, value}`
//! pairs and the status code as a string.

use http::{HeaderMap, Version};
use serde::{Deserialize, Serialize};

/// One API transaction: request metadata now, response metadata later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Inbound correlation id, empty when the client sent none.
    #[serde(rename = "requestID")]
    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// `host:port` of the origin the client addressed.
    pub destination_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_namespace: Option<String>,

    /// Client IP as reported by the edge or the peer socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,

    pub request: RequestSnapshot,

    /// Absent until the response phase completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
}

impl TelemetryRecord {
    /// A record is only shipped once the response has been attached.
    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSnapshot {
    pub method: String,
    /// Path plus query string.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub common: Common,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    pub status_code: String,
    pub common: Common,
}

/// Fields shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Common {
    /// Protocol label, e.g. `1.1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// One entry per value, repeated names grouped together
    /// (see [`headers_to_pairs`]).
    pub headers: Vec<Header>,

    /// Base64 of the captured (possibly truncated) body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    pub truncated_body: bool,

    /// Capture time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Flatten a header map into `{key, value}` pairs.
///
/// Repeated headers become repeated entries grouped under the first
/// occurrence of their name: `a: 1`, `b: 2`, `a: 3` comes out as
/// `a: 1`, `a: 3`, `b: 2`. Wire order across different names is not kept.
/// Values that are not valid UTF-8 are decoded lossily.
pub fn headers_to_pairs(headers: &HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Protocol label for an HTTP version.
pub fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}
