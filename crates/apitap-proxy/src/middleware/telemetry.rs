//! Telemetry capture middleware.
//!
//! Runs the per-transaction pipeline:
//!
//! ```text
//! classify(request) ── reject ──▶ forward, return
//!        │ accept
//! build_request_telemetry ── fail ──▶ forward, return
//!        │ ok
//!     forward ──▶ classify(response) ── reject ──▶ return
//!                        │ accept
//!                 queue for background capture + delivery ──▶ return
//! ```
//!
//! The request is forwarded exactly once and the response is returned
//! untouched whatever happens to its telemetry.

use super::layer::{BoxFuture, BoxedNext, MiddlewareLayer};
use crate::forward::UpstreamFailure;
use apitap_core::{build_request_telemetry, BufferedRequest, BufferedResponse, HttpClassifier, TapConfig};
use apitap_export::{PendingTelemetry, TelemetryDispatcher};
use std::sync::Arc;
use tracing::debug;

/// Middleware that snapshots API transactions for the collector.
///
/// # Example
///
/// ```ignore
/// use apitap_proxy::middleware::{LayerStack, TelemetryLayer};
///
/// let config = Arc::new(TapConfig::from_env()?);
/// let (dispatcher, supervisor) = TelemetryDispatcher::spawn(transport, config.clone(), Default::default());
/// let layers = LayerStack::new().layer(TelemetryLayer::new(config, dispatcher));
/// ```
#[derive(Clone)]
pub struct TelemetryLayer {
    classifier: HttpClassifier,
    config: Arc<TapConfig>,
    dispatcher: Option<TelemetryDispatcher>,
}

impl TelemetryLayer {
    pub fn new(config: Arc<TapConfig>, dispatcher: TelemetryDispatcher) -> Self {
        Self {
            classifier: HttpClassifier::new(config.clone()),
            config,
            dispatcher: Some(dispatcher),
        }
    }

    /// A layer that only forwards. Used when no collector is configured.
    pub fn passthrough(config: Arc<TapConfig>) -> Self {
        Self {
            classifier: HttpClassifier::new(config.clone()),
            config,
            dispatcher: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dispatcher.is_some() && self.config.is_enabled()
    }
}

impl MiddlewareLayer for TelemetryLayer {
    fn call(&self, req: BufferedRequest, next: BoxedNext) -> BoxFuture {
        let dispatcher = match &self.dispatcher {
            Some(dispatcher) if self.config.is_enabled() => dispatcher.clone(),
            _ => return next(req),
        };
        let classifier = self.classifier.clone();
        let config = self.config.clone();

        Box::pin(async move {
            if !classifier.is_api_request(&req) {
                debug!(uri = %req.uri(), "request is not classified as API");
                return next(req).await;
            }

            let record = match build_request_telemetry(&req, &config).await {
                Ok(record) => record,
                Err(e) => {
                    debug!(uri = %req.uri(), error = %e, "telemetry creation failed for request");
                    return next(req).await;
                }
            };

            let response = next(req).await;

            if response.extensions().get::<UpstreamFailure>().is_some() {
                debug!(request_id = %record.request_id, "upstream unreachable, no telemetry");
                return response;
            }
            if !classifier.is_api_response(&response) {
                debug!(
                    request_id = %record.request_id,
                    status = response.status().as_u16(),
                    "response is not classified as API"
                );
                return response;
            }

            // A full queue is logged by the dispatcher; the response goes back regardless
            let _ = dispatcher.submit(PendingTelemetry::new(record, snapshot(&response)));
            response
        })
    }

    fn clone_box(&self) -> Box<dyn MiddlewareLayer> {
        Box::new(self.clone())
    }
}

/// Copy of the response for the background worker. The body is a
/// reference-counted handle, not a byte copy.
fn snapshot(response: &BufferedResponse) -> BufferedResponse {
    let mut copy = http::Response::new(response.body().clone());
    *copy.status_mut() = response.status();
    *copy.version_mut() = response.version();
    *copy.headers_mut() = response.headers().clone();
    copy
}
