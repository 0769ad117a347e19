use http::{HeaderMap, Method};
use serde_json::Value;

/// Matcher for requests hitting a [`MockServer`](crate::MockServer).
///
/// Every criterion that is set must hold; an empty matcher matches anything.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) path_prefix: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) present_headers: Vec<String>,
    pub(crate) absent_headers: Vec<String>,
    pub(crate) json_fields: Vec<(String, Value)>,
    pub(crate) body_string: Option<String>,
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a specific HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match the exact path (query excluded)
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match any path starting with `prefix`
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Match a header with an exact value
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Require a header to be present with any value
    pub fn header_present(mut self, key: impl Into<String>) -> Self {
        self.present_headers.push(key.into());
        self
    }

    /// Require a header to be missing
    pub fn header_absent(mut self, key: impl Into<String>) -> Self {
        self.absent_headers.push(key.into());
        self
    }

    /// Match a JSON body whose value at `pointer` (RFC 6901) equals `value`.
    ///
    /// Useful against collector payloads, e.g. `.json_field("/requestID", "abc")`.
    pub fn json_field(mut self, pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        self.json_fields.push((pointer.into(), value.into()));
        self
    }

    /// Match exact string body
    pub fn body_string(mut self, body: impl Into<String>) -> Self {
        self.body_string = Some(body.into());
        self
    }

    /// Check if the matcher matches a request
    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        if self.path.as_deref().is_some_and(|p| p != path) {
            return false;
        }
        if self
            .path_prefix
            .as_deref()
            .is_some_and(|prefix| !path.starts_with(prefix))
        {
            return false;
        }

        for (k, v) in &self.headers {
            match headers.get(k) {
                Some(val) if val == v.as_str() => {}
                _ => return false,
            }
        }
        if self.present_headers.iter().any(|k| !headers.contains_key(k.as_str())) {
            return false;
        }
        if self.absent_headers.iter().any(|k| headers.contains_key(k.as_str())) {
            return false;
        }

        if !self.json_fields.is_empty() {
            let Ok(actual) = serde_json::from_slice::<Value>(body) else {
                return false;
            };
            for (pointer, expected) in &self.json_fields {
                if actual.pointer(pointer) != Some(expected) {
                    return false;
                }
            }
        }

        if let Some(expected) = &self.body_string {
            match std::str::from_utf8(body) {
                Ok(actual) if actual == expected => {}
                _ => return false,
            }
        }

        true
    }
}
