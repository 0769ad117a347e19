//! HTTP/1 listener
//!
//! Accepts connections, buffers each request body up to the configured
//! limit and runs it through the [`LayerStack`] with the upstream forwarder
//! as the final handler.

use crate::body::{declared_length_exceeds, read_body, BodyReadError};
use crate::middleware::{BoxedNext, LayerStack};
use apitap_core::{BufferedRequest, ClientAddr};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{StatusCode, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Internal server struct
pub(crate) struct Server {
    layers: Arc<LayerStack>,
    handler: BoxedNext,
    public_scheme: Arc<str>,
    drain_timeout: Duration,
    body_limit: usize,
}

impl Server {
    pub fn new(
        layers: LayerStack,
        handler: BoxedNext,
        public_scheme: &str,
        drain_timeout: Duration,
        body_limit: usize,
    ) -> Self {
        Self {
            layers: Arc::new(layers),
            handler,
            public_scheme: Arc::from(public_scheme),
            drain_timeout,
            body_limit,
        }
    }

    /// Serve `listener` until `shutdown` resolves, then let open
    /// connections finish their current exchange.
    ///
    /// Returns how long the connection drain took, at most the drain timeout.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<Duration>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            accept_backoff(&e).await;
                            continue;
                        }
                    };
                    connections.spawn(self.connection(stream, remote_addr, stop_rx.clone()));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    info!("shutdown signal received, draining connections");
                    break;
                }
            }
        }

        drop(listener);
        let drain_started = Instant::now();
        let _ = stop_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                open = connections.len(),
                "connections still open after drain timeout, aborting"
            );
            connections.shutdown().await;
        }

        Ok(drain_started.elapsed())
    }

    fn connection(
        &self,
        stream: tokio::net::TcpStream,
        remote_addr: SocketAddr,
        mut stop: watch::Receiver<bool>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let io = TokioIo::new(stream);
        let layers = self.layers.clone();
        let handler = self.handler.clone();
        let public_scheme = self.public_scheme.clone();
        let body_limit = self.body_limit;

        async move {
            let service = service_fn(move |req: hyper::Request<Incoming>| {
                let layers = layers.clone();
                let handler = handler.clone();
                let public_scheme = public_scheme.clone();
                async move {
                    let response = handle_request(
                        layers,
                        handler,
                        &public_scheme,
                        body_limit,
                        req,
                        remote_addr,
                    )
                    .await;
                    Ok::<_, Infallible>(response)
                }
            });

            let conn = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(conn);

            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = stop.changed() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(err) = result {
                debug!(peer = %remote_addr, error = %err, "connection error");
            }
        }
    }
}

/// Handle a single HTTP request
async fn handle_request(
    layers: Arc<LayerStack>,
    handler: BoxedNext,
    public_scheme: &str,
    body_limit: usize,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> hyper::Response<Full<Bytes>> {
    let (mut parts, body) = req.into_parts();

    if declared_length_exceeds(&parts.headers, body_limit) {
        debug!(peer = %remote_addr, limit = body_limit, "declared request body over limit");
        return payload_too_large();
    }
    let body = match read_body(body, body_limit).await {
        Ok(bytes) => bytes,
        Err(BodyReadError::TooLarge { limit }) => {
            debug!(peer = %remote_addr, limit, "request body over limit");
            return payload_too_large();
        }
        Err(e) => {
            debug!(peer = %remote_addr, error = %e, "failed to read request body");
            return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    if let Some(uri) = absolute_uri(&parts, public_scheme) {
        parts.uri = uri;
    }
    parts.extensions.insert(ClientAddr(remote_addr));

    let request: BufferedRequest = http::Request::from_parts(parts, body);
    let response = layers.execute(request, handler).await;

    response.map(Full::new)
}

/// `{scheme}://{Host}{path?query}` for an origin-form request target.
///
/// Returns `None` when the target is already absolute or there is no usable
/// `Host` header; the request then keeps its original target.
fn absolute_uri(parts: &Parts, public_scheme: &str) -> Option<Uri> {
    if parts.uri.scheme().is_some() {
        return None;
    }
    let host = parts.headers.get(HOST)?.to_str().ok()?.trim();
    if host.is_empty() {
        return None;
    }
    let scheme = parts
        .headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| v == "http" || v == "https")
        .unwrap_or_else(|| public_scheme.to_string());
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{scheme}://{host}{path_and_query}").parse().ok()
}

async fn accept_backoff(error: &std::io::Error) {
    warn!(error = %error, "accept failed");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

fn payload_too_large() -> hyper::Response<Full<Bytes>> {
    plain_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
}

fn plain_response(status: StatusCode, text: &'static str) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
