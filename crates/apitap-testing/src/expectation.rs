use super::matcher::RequestMatcher;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// An expectation for a request
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) call_count: usize,
}

impl Expectation {
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::default(),
            times: Times::Any,
            call_count: 0,
        }
    }
}

/// Define how many times an expectation should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Once,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Any,
}

impl Times {
    pub(crate) fn check(&self, calls: usize) -> Result<(), String> {
        let ok = match *self {
            Times::Once => calls == 1,
            Times::Exactly(n) => calls == n,
            Times::AtLeast(n) => calls >= n,
            Times::AtMost(n) => calls <= n,
            Times::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {:?} calls, got {}", self, calls))
        }
    }
}

/// A canned response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) delay: Option<Duration>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: None,
        }
    }
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Append a header. Repeated calls with the same name keep every value.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.append(
            http::header::HeaderName::from_bytes(key.as_bytes()).expect("valid header name"),
            http::header::HeaderValue::from_str(value).expect("valid header value"),
        );
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(mut self, body: impl serde::Serialize) -> Self {
        self.headers.insert(
            http::header::CONTENT_TYPE,
            http::header::HeaderValue::from_static("application/json"),
        );
        self.body = serde_json::to_vec(&body)
            .expect("serializable mock body")
            .into();
        self
    }

    /// Hold the response back, e.g. to simulate a slow collector.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
