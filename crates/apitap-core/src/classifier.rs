//! API-likeness classifier.
//!
//! A cheap, side-effect-free heuristic run twice per transaction: once on
//! the inbound request and once on the origin's response. Every input is
//! accepted; malformed values degrade to a conservative answer instead of
//! an error.

use crate::config::TapConfig;
use http::header::{HeaderMap, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use tracing::debug;

const API_WORDS: [&str; 2] = ["api", "rest"];

const VERSION_MARKERS: [&str; 10] = [
    "v1", "v2", "v3", "v4", "v5", "1.0", "2.0", "3.0", "4.0", "5.0",
];

/// Lower-cased user agent fragments of health checkers and scrapers.
const IGNORED_USER_AGENTS: [&str; 3] = ["elb-healthchecker", "prometheus", "k8s"];

/// Decides whether a request or response looks like API traffic.
#[derive(Clone, Debug)]
pub struct HttpClassifier {
    config: Arc<TapConfig>,
}

impl HttpClassifier {
    pub fn new(config: Arc<TapConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Classify an inbound request.
    pub fn is_api_request<B>(&self, request: &Request<B>) -> bool {
        self.classify_request(request.method(), request.uri(), request.headers())
    }

    /// Classify an origin response.
    pub fn is_api_response<B>(&self, response: &Response<B>) -> bool {
        self.classify_response(response.status(), response.headers())
    }

    /// Request heuristic over the raw parts.
    pub fn classify_request(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        if !self.accept_http_method(method.as_str()) {
            debug!(method = %method, "request method excluded");
            return false;
        }
        if !self.accept_headers(headers) {
            debug!(uri = %uri, "request carries an excluded header");
            return false;
        }

        let path = path_and_query(uri).to_ascii_lowercase();
        let host = request_host(uri, headers)
            .unwrap_or_default()
            .to_ascii_lowercase();

        let api_in_path = API_WORDS.iter().any(|w| path.contains(w));
        let api_in_host = API_WORDS.iter().any(|w| host.contains(w));
        let versioned_path = VERSION_MARKERS.iter().any(|v| path.contains(v));
        let has_ext = last_segment(&path).contains('.');

        let api_like_url = api_in_path || versioned_path || api_in_host;
        let api_like_content = match get_header(headers, CONTENT_TYPE.as_str()) {
            Some(content_type) if !content_type.is_empty() => {
                accept_request_content_type(&content_type)
            }
            _ => true,
        };

        if !((api_like_url || api_like_content) && !has_ext) {
            debug!(uri = %uri, api_like_url, api_like_content, has_ext, "request is not API-like");
            return false;
        }

        let user_agent = get_header(headers, USER_AGENT.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if IGNORED_USER_AGENTS.iter().any(|ua| user_agent.contains(ua)) {
            debug!(user_agent = %user_agent, "ignoring health-check traffic");
            return false;
        }

        true
    }

    /// Response heuristic over the raw parts.
    pub fn classify_response(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        if !self.accept_http_status_code(status.as_str()) {
            debug!(status = status.as_u16(), "response status excluded");
            return false;
        }
        if !self.accept_headers(headers) {
            debug!(status = status.as_u16(), "response carries an excluded header");
            return false;
        }
        if let Some(content_type) = get_header(headers, CONTENT_TYPE.as_str()) {
            if !content_type.is_empty() && !accept_response_content_type(&content_type) {
                debug!(content_type = %content_type, "response content type is not JSON");
                return false;
            }
        }
        true
    }

    /// `false` when the method is in the excluded set.
    pub fn accept_http_method(&self, method: &str) -> bool {
        !self.config.is_excluded_method(method)
    }

    /// `false` when any header name is in the excluded set.
    pub fn accept_headers(&self, headers: &HeaderMap) -> bool {
        !headers
            .keys()
            .any(|name| self.config.is_excluded_header(name.as_str()))
    }

    /// `false` for non-numeric codes and codes inside any excluded range.
    pub fn accept_http_status_code(&self, status_code: &str) -> bool {
        let Ok(code) = status_code.trim().parse::<u32>() else {
            return false;
        };
        !self
            .config
            .excluded_status_patterns()
            .iter()
            .any(|pattern| pattern.matches(code))
    }
}

/// Every value of a header joined with `", "`, lossily decoded.
///
/// Lookup is case-insensitive. `None` when the header is absent.
pub fn get_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<_> = headers
        .get_all(name)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.join(", "))
}

/// MIME type without parameters: everything before the first `;`, trimmed.
pub fn extract_mime_type(content_type: &str) -> &str {
    match content_type.find(';') {
        Some(idx) => content_type[..idx].trim(),
        None => content_type.trim(),
    }
}

/// JSON, url-encoded forms and multipart forms.
pub fn accept_request_content_type(content_type: &str) -> bool {
    let mime = extract_mime_type(content_type);
    is_json(mime)
        || mime.starts_with("application/x-www-form-urlencoded")
        || mime.starts_with("multipart/form-data")
}

/// JSON only, including vendor types like `application/problem+json`.
pub fn accept_response_content_type(content_type: &str) -> bool {
    is_json(extract_mime_type(content_type))
}

fn is_json(mime: &str) -> bool {
    mime.starts_with("application/") && mime.ends_with("json")
}

/// Path plus query, `/` when the URI has no path.
pub fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Host (with port when present) from the URI authority, falling back to the
/// `Host` header.
pub fn request_host(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    if let Some(authority) = uri.authority() {
        return Some(authority.as_str().to_string());
    }
    get_header(headers, HOST.as_str())
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
}

/// Last `/`-separated segment with query and fragment stripped.
fn last_segment(path: &str) -> &str {
    let no_query = path.split('?').next().unwrap_or(path);
    let path_only = no_query.split('#').next().unwrap_or(no_query);
    match path_only.rfind('/') {
        Some(idx) => &path_only[idx + 1..],
        None => path_only,
    }
}
