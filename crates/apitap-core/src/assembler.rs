//! Telemetry assembly.
//!
//! [`build_request_telemetry`] describes an accepted request;
//! [`attach_response_telemetry`] later completes the same record with the
//! response. Both read bodies through an independent duplicate of the
//! buffered bytes.

use crate::capture::{capture_body, CapturedBody, Direction};
use crate::classifier::{get_header, path_and_query};
use crate::config::TapConfig;
use crate::error::{Result, TapError};
use crate::record::{headers_to_pairs, version_label, Common, RequestSnapshot, ResponseSnapshot, TelemetryRecord};
use bytes::Bytes;
use http::header::HOST;
use http::uri::Authority;
use http::{Request, Response};
use http_body_util::Full;
use std::net::SocketAddr;

/// Peer address of the inbound connection, stored as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Build the request half of a record.
///
/// Fails when the request names no host, or when the body duplicate cannot
/// be read. Callers treat a failure as "no telemetry" and forward anyway.
pub async fn build_request_telemetry(
    request: &Request<Bytes>,
    config: &TapConfig,
) -> Result<TelemetryRecord> {
    let uri = request.uri();
    let authority = match uri.authority() {
        Some(authority) => authority.clone(),
        None => get_header(request.headers(), HOST.as_str())
            .and_then(|host| host.trim().parse::<Authority>().ok())
            .ok_or_else(|| TapError::Assembly("request has no host".to_string()))?,
    };

    let scheme = uri.scheme_str().map(str::to_ascii_lowercase);
    let port = authority.port_u16().unwrap_or(match scheme.as_deref() {
        Some("https") => 443,
        _ => 80,
    });
    let destination_address = format!("{}:{}", authority.host(), port);

    let request_id = get_header(request.headers(), config.correlation_header.as_str())
        .unwrap_or_default();
    let source_address = get_header(request.headers(), config.source_ip_header.as_str())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ClientAddr>()
                .map(|addr| addr.0.ip().to_string())
        });

    let captured = capture_body(
        Full::new(request.body().clone()),
        config.request_body_limit(),
        Direction::Request,
    )
    .await?;

    Ok(TelemetryRecord {
        request_id,
        scheme,
        destination_address,
        destination_namespace: config.namespace.clone(),
        source_address,
        request: RequestSnapshot {
            method: request.method().to_string(),
            path: path_and_query(uri).to_string(),
            host: Some(authority.as_str().to_string()),
            common: common(version_label(request.version()), request.headers(), captured),
        },
        response: None,
    })
}

/// Complete a record with the response half.
///
/// On failure the record keeps `response == None` and must not be shipped.
pub async fn attach_response_telemetry(
    record: &mut TelemetryRecord,
    response: &Response<Bytes>,
    config: &TapConfig,
) -> Result<()> {
    let captured = capture_body(
        Full::new(response.body().clone()),
        config.response_body_limit(),
        Direction::Response,
    )
    .await?;

    record.response = Some(ResponseSnapshot {
        status_code: response.status().as_u16().to_string(),
        common: common(version_label(response.version()), response.headers(), captured),
    });
    Ok(())
}

fn common(version: &str, headers: &http::HeaderMap, captured: CapturedBody) -> Common {
    Common {
        version: Some(version.to_string()),
        headers: headers_to_pairs(headers),
        body: Some(captured.encoded),
        truncated_body: captured.truncated,
        time: Some(chrono::Utc::now().timestamp_millis()),
    }
}
