use super::expectation::{Expectation, MockResponse, Times};
use super::matcher::RequestMatcher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type Result<T> = std::result::Result<T, GenericError>;

/// A scriptable HTTP server on a random local port.
///
/// Every request is recorded, matched or not, so tests can inspect exactly
/// what an origin or a collector received.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    arrivals: Arc<Notify>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

struct ServerState {
    expectations: Vec<Expectation>,
    received: Vec<RecordedRequest>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: http::HeaderMap,
    pub body: Bytes,
    pub matched: bool,
}

impl RecordedRequest {
    /// Parse the body as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl MockServer {
    /// Start a new mock server on a random port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");

        let state = Arc::new(Mutex::new(ServerState {
            expectations: Vec::new(),
            received: Vec::new(),
        }));
        let arrivals = Arc::new(Notify::new());

        let state_clone = state.clone();
        let arrivals_clone = arrivals.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stop_future = shutdown_rx;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state_clone.clone();
                                let arrivals = arrivals_clone.clone();

                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        handle_request(req, state.clone(), arrivals.clone())
                                    });
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        tracing::debug!("mock server connection error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => tracing::debug!("mock server accept error: {}", e),
                        }
                    }
                    _ = &mut stop_future => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            state,
            arrivals,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the server, e.g. `http://127.0.0.1:41234`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Every request received so far, in arrival order
    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        self.lock().received.clone()
    }

    /// Requests that didn't match any expectation
    pub fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        self.lock()
            .received
            .iter()
            .filter(|r| !r.matched)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` requests have arrived or `timeout` passes.
    ///
    /// Returns whatever was received by then.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrivals.notified();
            if self.lock().received.len() >= count {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }
        self.received_requests()
    }

    /// Add an expectation
    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            server: self.state.clone(),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Verify that all expectations were met
    pub fn verify(&self) {
        let state = self.lock();
        for exp in &state.expectations {
            if let Err(msg) = exp.times.check(exp.call_count) {
                panic!("Expectation {:?}: {}", exp.matcher, msg);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct ExpectationBuilder {
    server: Arc<Mutex<ServerState>>,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.response = response;
        }
        self
    }

    pub fn times(self, n: usize) -> Self {
        self.with_times(Times::Exactly(n))
    }

    pub fn once(self) -> Self {
        self.with_times(Times::Once)
    }

    pub fn at_least_once(self) -> Self {
        self.with_times(Times::AtLeast(1))
    }

    pub fn never(self) -> Self {
        self.with_times(Times::Exactly(0))
    }

    fn with_times(mut self, times: Times) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = times;
        }
        self
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            let mut state = self.server.lock().unwrap_or_else(|e| e.into_inner());
            state.expectations.push(exp);
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<ServerState>>,
    arrivals: Arc<Notify>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body_bytes = body.collect().await?.to_bytes();

    let canned = {
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());

        // Later expectations take priority over earlier ones
        let matching_idx = guard
            .expectations
            .iter()
            .enumerate()
            .rev()
            .find(|(_, exp)| {
                exp.matcher
                    .matches(&parts.method, parts.uri.path(), &parts.headers, &body_bytes)
            })
            .map(|(i, _)| i);

        let canned = matching_idx.map(|idx| {
            let exp = &mut guard.expectations[idx];
            exp.call_count += 1;
            exp.response.clone()
        });

        guard.received.push(RecordedRequest {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            body: body_bytes,
            matched: canned.is_some(),
        });
        canned
    };
    arrivals.notify_waiters();

    match canned {
        Some(resp_def) => {
            if let Some(delay) = resp_def.delay {
                tokio::time::sleep(delay).await;
            }
            let mut response = Response::builder().status(resp_def.status);
            for (k, v) in &resp_def.headers {
                response = response.header(k, v);
            }
            Ok(response.body(Full::new(resp_def.body))?)
        }
        None => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("No expectation matched")))?),
    }
}
