//! Upstream forwarding.
//!
//! The forwarder is the innermost handler of the chain. It points the
//! request at the configured origin, sends it once and hands back the
//! buffered response. It never fails: transport errors become a
//! `502 Bad Gateway` tagged with [`UpstreamFailure`].

use crate::body::{
    declared_length_exceeds, read_body, BodyReadError, DEFAULT_MAX_BUFFERED_BODY_SIZE,
};
use crate::middleware::{handler_fn, BoxedNext};
use apitap_core::{BufferedRequest, BufferedResponse};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_TYPE};
use http::uri::{PathAndQuery, Uri};
use http::StatusCode;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot build upstream uri: {0}")]
    Uri(#[from] http::Error),

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("upstream response body: {0}")]
    Body(#[from] BodyReadError),
}

/// Response extension marking a `502` produced by the forwarder itself.
///
/// Lets later stages tell a failed forward from an origin that really
/// answered `502`.
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    pub reason: String,
}

/// Sends requests to a fixed origin with a pooled hyper client.
#[derive(Clone)]
pub struct UpstreamForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    upstream: Uri,
    body_limit: usize,
}

impl UpstreamForwarder {
    /// `upstream` supplies scheme and authority; path and query come from
    /// each request.
    pub fn new(upstream: Uri) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            upstream,
            body_limit: DEFAULT_MAX_BUFFERED_BODY_SIZE,
        }
    }

    /// Largest upstream response body that is buffered. Bigger responses
    /// become a `502`.
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn upstream(&self) -> &Uri {
        &self.upstream
    }

    /// Forward one request.
    pub async fn forward(&self, req: BufferedRequest) -> BufferedResponse {
        match self.try_forward(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(upstream = %self.upstream, error = %e, "forwarding failed");
                bad_gateway(e.to_string())
            }
        }
    }

    /// The forwarder as the final handler of a [`LayerStack`](crate::middleware::LayerStack).
    pub fn into_handler(self) -> BoxedNext {
        let forwarder = Arc::new(self);
        handler_fn(move |req| {
            let forwarder = forwarder.clone();
            async move { forwarder.forward(req).await }
        })
    }

    async fn try_forward(&self, req: BufferedRequest) -> Result<BufferedResponse, ForwardError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = self.upstream_uri(&parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);
        debug!(uri = %parts.uri, "forwarding upstream");

        let response = self
            .client
            .request(http::Request::from_parts(parts, Full::new(body)))
            .await?;

        let (mut parts, body) = response.into_parts();
        if declared_length_exceeds(&parts.headers, self.body_limit) {
            return Err(BodyReadError::TooLarge {
                limit: self.body_limit,
            }
            .into());
        }
        let body = read_body(body, self.body_limit).await?;
        strip_hop_by_hop(&mut parts.headers);

        Ok(http::Response::from_parts(parts, body))
    }

    fn upstream_uri(&self, original: &Uri) -> Result<Uri, ForwardError> {
        let path_and_query = original
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        let mut builder = Uri::builder().path_and_query(path_and_query);
        if let Some(scheme) = self.upstream.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.upstream.authority() {
            builder = builder.authority(authority.clone());
        }
        Ok(builder.build()?)
    }
}

fn bad_gateway(reason: String) -> BufferedResponse {
    let mut response = http::Response::new(Bytes::from_static(b"Bad Gateway"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response.extensions_mut().insert(UpstreamFailure { reason });
    response
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: HashSet<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied() {
        headers.remove(name);
    }
    for name in listed {
        headers.remove(name.as_str());
    }
}
