//! Access logging middleware
//!
//! Wraps each proxied request in an `http_request` span carrying method,
//! path, correlation id, status code and duration.

use super::layer::{BoxFuture, BoxedNext, MiddlewareLayer};
use apitap_core::BufferedRequest;
use http::header::HeaderName;
use std::time::Instant;
use tracing::{info_span, Instrument, Level};

/// Middleware layer that creates tracing spans for requests
///
/// # Example
///
/// ```rust,ignore
/// use apitap_proxy::middleware::{AccessLogLayer, LayerStack};
///
/// let layers = LayerStack::new().layer(
///     AccessLogLayer::new()
///         .with_field("service", "apitap")
///         .with_field("region", "eu-west-1"),
/// );
/// ```
#[derive(Clone)]
pub struct AccessLogLayer {
    level: Level,
    correlation_header: HeaderName,
    custom_fields: Vec<(String, String)>,
}

impl AccessLogLayer {
    /// Log successful requests at INFO
    pub fn new() -> Self {
        Self::with_level(Level::INFO)
    }

    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            correlation_header: HeaderName::from_static(apitap_core::config::DEFAULT_CORRELATION_HEADER),
            custom_fields: Vec::new(),
        }
    }

    /// Header the `request_id` span field is read from
    pub fn correlation_header(mut self, header: HeaderName) -> Self {
        self.correlation_header = header;
        self
    }

    /// Add a custom field to the completion event of every request
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.push((key.into(), value.into()));
        self
    }
}

impl Default for AccessLogLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareLayer for AccessLogLayer {
    fn call(&self, req: BufferedRequest, next: BoxedNext) -> BoxFuture {
        let level = self.level;
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let request_id = req
            .headers()
            .get(&self.correlation_header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let fields = self
            .custom_fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");

        Box::pin(async move {
            let start = Instant::now();

            let span = info_span!(
                "http_request",
                method = %method,
                path = %path,
                request_id = %request_id,
                status = tracing::field::Empty,
                duration_ms = tracing::field::Empty,
                error = tracing::field::Empty,
            );

            let response = next(req).instrument(span.clone()).await;

            let duration_ms = start.elapsed().as_millis() as u64;
            let status = response.status();
            let status_code = status.as_u16();

            span.record("status", status_code);
            span.record("duration_ms", duration_ms);
            if status.is_client_error() || status.is_server_error() {
                span.record("error", true);
            }

            span.in_scope(|| {
                if status.is_server_error() {
                    tracing::warn!(status = status_code, duration_ms, fields = %fields, "Request failed");
                    return;
                }
                match level {
                    Level::TRACE => tracing::trace!(status = status_code, duration_ms, fields = %fields, "Request completed"),
                    Level::DEBUG => tracing::debug!(status = status_code, duration_ms, fields = %fields, "Request completed"),
                    Level::INFO => tracing::info!(status = status_code, duration_ms, fields = %fields, "Request completed"),
                    Level::WARN => tracing::warn!(status = status_code, duration_ms, fields = %fields, "Request completed"),
                    _ => tracing::error!(status = status_code, duration_ms, fields = %fields, "Request completed"),
                }
            });

            response
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::layer::{handler_fn, LayerStack};
    use bytes::Bytes;
    use http::StatusCode;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    /// Captures span fields for verification
    #[derive(Clone, Default)]
    struct SpanFieldCapture {
        spans: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    }

    impl<S> tracing_subscriber::Layer<S> for SpanFieldCapture
    where
        S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = HashMap::new();
            attrs.record(&mut FieldVisitor { fields: &mut fields });
            self.spans
                .lock()
                .unwrap()
                .push((attrs.metadata().name().to_string(), fields));
        }

        fn on_record(
            &self,
            _id: &tracing::span::Id,
            values: &tracing::span::Record<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if let Some((_, fields)) = self.spans.lock().unwrap().last_mut() {
                values.record(&mut FieldVisitor { fields });
            }
        }
    }

    struct FieldVisitor<'a> {
        fields: &'a mut HashMap<String, String>,
    }

    impl<'a> tracing::field::Visit for FieldVisitor<'a> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.fields.insert(field.name().to_string(), format!("{:?}", value));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.fields.insert(field.name().to_string(), value.to_string());
        }

        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            self.fields.insert(field.name().to_string(), value.to_string());
        }

        fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    #[test]
    fn test_access_log_layer_builder() {
        let layer = AccessLogLayer::with_level(Level::DEBUG)
            .with_field("service", "apitap")
            .correlation_header(HeaderName::from_static("x-correlation-id"));
        assert_eq!(layer.level, Level::DEBUG);
        assert_eq!(layer.custom_fields.len(), 1);
        assert_eq!(layer.correlation_header.as_str(), "x-correlation-id");
    }

    #[tokio::test]
    async fn test_span_records_request_and_status() {
        let capture = SpanFieldCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let stack = LayerStack::new().layer(AccessLogLayer::new());
        let handler = handler_fn(|_req| async {
            let mut response = http::Response::new(Bytes::new());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        });
        let request = http::Request::builder()
            .method("DELETE")
            .uri("http://api.example.com/api/v1/items/9?force=1")
            .header("x-request-id", "req-77")
            .body(Bytes::new())
            .unwrap();

        let response = stack.execute(request, handler).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let spans = capture.spans.lock().unwrap();
        let (name, fields) = spans
            .iter()
            .find(|(name, _)| name == "http_request")
            .expect("http_request span");
        assert_eq!(name, "http_request");
        assert_eq!(fields.get("method").map(String::as_str), Some("DELETE"));
        assert_eq!(fields.get("path").map(String::as_str), Some("/api/v1/items/9"));
        assert_eq!(fields.get("request_id").map(String::as_str), Some("req-77"));
        assert_eq!(fields.get("status").map(String::as_str), Some("404"));
        assert_eq!(fields.get("error").map(String::as_str), Some("true"));
        assert!(fields.contains_key("duration_ms"));
    }
}
