//! Middleware for the proxy's request path
//!
//! - [`LayerStack`]: ordered chain of [`MiddlewareLayer`]s around the forwarder
//! - [`AccessLogLayer`]: one tracing span per request
//! - [`TelemetryLayer`]: classification, capture and hand-off to the dispatcher

mod access_log;
mod layer;
mod telemetry;

pub use access_log::AccessLogLayer;
pub use layer::{handler_fn, BoxFuture, BoxedNext, LayerStack, MiddlewareLayer};
pub use telemetry::TelemetryLayer;
