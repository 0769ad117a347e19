//! # apitap-core
//!
//! Core engine of apitap: decides whether an HTTP transaction looks like an
//! API call and, if so, turns it into a [`TelemetryRecord`].
//!
//! Nothing in this crate performs network I/O. The proxy crate owns the
//! request path and the export crate owns delivery to the collector.
//!
//! ## Overview
//!
//! - [`config`]: `APITAP_*` settings parsed once into [`TapConfig`]
//! - [`classifier`]: [`HttpClassifier`] request/response heuristics
//! - [`capture`]: bounded, base64-encoded body capture
//! - [`record`]: the JSON record sent to the collector
//! - [`assembler`]: builds and completes records
//!
//! ## Example
//!
//! ```ignore
//! use apitap_core::{build_request_telemetry, HttpClassifier, TapConfig};
//! use std::sync::Arc;
//!
//! let config = Arc::new(TapConfig::from_env()?);
//! let classifier = HttpClassifier::new(config.clone());
//!
//! if classifier.is_api_request(&request) {
//!     let record = build_request_telemetry(&request, &config).await?;
//! }
//! ```

pub mod assembler;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod record;

pub use assembler::{attach_response_telemetry, build_request_telemetry, ClientAddr};
pub use capture::{capture_body, decode_body, encode_body, CapturedBody, Direction};
pub use classifier::HttpClassifier;
pub use config::{
    load_dotenv, load_dotenv_from, Environment, RawTapConfig, StatusCodePattern, TapConfig,
};
pub use error::{CaptureError, ConfigError, Result, TapError};
pub use record::{Common, Header, RequestSnapshot, ResponseSnapshot, TelemetryRecord};

/// A request whose body has been fully buffered.
pub type BufferedRequest = http::Request<bytes::Bytes>;

/// A response whose body has been fully buffered.
pub type BufferedResponse = http::Response<bytes::Bytes>;
