//! # apitap-export
//!
//! Delivery of telemetry records to the collector.
//!
//! - [`transport`]: the [`CollectorTransport`] seam and the reqwest-backed [`HttpCollector`]
//! - [`dispatcher`]: bounded queue, worker and supervisor with a drain-on-exit contract
//!
//! Delivery is fire-and-forget: failures are logged and counted, never
//! retried, and never surface on the request path.

pub mod dispatcher;
pub mod error;
pub mod transport;

pub use dispatcher::{
    DispatchConfig, DispatchStats, DispatchSupervisor, PendingTelemetry, TelemetryDispatcher,
};
pub use error::{DispatchError, TransportError};
pub use transport::{CollectorConfig, CollectorTransport, HttpCollector};
