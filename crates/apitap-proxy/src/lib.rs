//! # apitap-proxy
//!
//! Reverse proxy that sits in front of an HTTP origin, forwards every
//! request unchanged and ships snapshots of API-looking transactions to a
//! telemetry collector.
//!
//! ```text
//! client ──▶ AccessLogLayer ──▶ TelemetryLayer ──▶ UpstreamForwarder ──▶ origin
//!                                     │
//!                                     └──▶ TelemetryDispatcher ──▶ collector
//! ```
//!
//! The `apitap` binary wires this up from `APITAP_*` environment variables.

mod app;
mod body;
pub mod config;
mod error;
pub mod forward;
pub mod middleware;
mod server;

pub use app::TapProxy;
pub use config::ProxyConfig;
pub use error::ProxyError;
pub use forward::{UpstreamFailure, UpstreamForwarder};
pub use middleware::{AccessLogLayer, LayerStack, MiddlewareLayer, TelemetryLayer};
