//! Hosting settings for the proxy binary.
//!
//! Read from the same `APITAP_` prefix as the telemetry settings:
//!
//! | variable | default |
//! |---|---|
//! | `APITAP_LISTEN_ADDR` | `0.0.0.0:8787` |
//! | `APITAP_UPSTREAM_URL` | required |
//! | `APITAP_PUBLIC_SCHEME` | `http` |
//! | `APITAP_QUEUE_CAPACITY` | `1024` |
//! | `APITAP_MAX_IN_FLIGHT` | `16` |
//! | `APITAP_TRANSPORT_TIMEOUT_SECS` | `10` |
//! | `APITAP_SHUTDOWN_GRACE_SECS` | `30` |
//! | `APITAP_MAX_BUFFERED_BODY_SIZE` | `16777216` |
//!
//! The shutdown grace is one budget for the whole shutdown: open
//! connections drain first and queued telemetry gets whatever is left.

use crate::body::DEFAULT_MAX_BUFFERED_BODY_SIZE;
use apitap_core::config::from_env_prefixed;
use apitap_core::ConfigError;
use apitap_export::DispatchConfig;
use http::Uri;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
struct RawProxyConfig {
    #[serde(default)]
    listen_addr: Option<String>,
    #[serde(default)]
    upstream_url: Option<String>,
    #[serde(default)]
    public_scheme: Option<String>,
    #[serde(default)]
    queue_capacity: Option<usize>,
    #[serde(default)]
    max_in_flight: Option<usize>,
    #[serde(default)]
    transport_timeout_secs: Option<u64>,
    #[serde(default)]
    shutdown_grace_secs: Option<u64>,
    #[serde(default)]
    max_buffered_body_size: Option<usize>,
}

/// Validated hosting configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// Origin that receives every request. Only `http` origins are supported.
    pub upstream: Uri,
    /// Scheme assumed for inbound requests without `X-Forwarded-Proto`.
    pub public_scheme: String,
    pub dispatch: DispatchConfig,
    pub transport_timeout: Duration,
    /// Total time allowed for draining connections and then telemetry.
    pub shutdown_grace: Duration,
    /// Largest request or response body the proxy will buffer. Larger
    /// requests get `413`, larger origin responses `502`.
    pub max_buffered_body_size: usize,
}

impl ProxyConfig {
    /// Defaults with the given origin.
    pub fn new(upstream: Uri) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8787)),
            upstream,
            public_scheme: "http".to_string(),
            dispatch: DispatchConfig::default(),
            transport_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
            max_buffered_body_size: DEFAULT_MAX_BUFFERED_BODY_SIZE,
        }
    }

    /// Read and validate `APITAP_*` hosting variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_raw(from_env_prefixed()?)
    }

    fn from_raw(raw: RawProxyConfig) -> Result<Self, ConfigError> {
        let upstream = raw
            .upstream_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("APITAP_UPSTREAM_URL"))?;
        let mut config = Self::new(parse_upstream(upstream)?);

        if let Some(addr) = raw.listen_addr.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            config.listen_addr = addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    name: "APITAP_LISTEN_ADDR",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(scheme) = raw.public_scheme.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let scheme = scheme.to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(ConfigError::InvalidValue {
                    name: "APITAP_PUBLIC_SCHEME",
                    reason: format!("expected http or https, got `{scheme}`"),
                });
            }
            config.public_scheme = scheme;
        }
        if let Some(capacity) = raw.queue_capacity.filter(|c| *c > 0) {
            config.dispatch.queue_capacity = capacity;
        }
        if let Some(max) = raw.max_in_flight.filter(|m| *m > 0) {
            config.dispatch.max_in_flight = max;
        }
        if let Some(secs) = raw.transport_timeout_secs.filter(|s| *s > 0) {
            config.transport_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.shutdown_grace_secs {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(size) = raw.max_buffered_body_size.filter(|s| *s > 0) {
            config.max_buffered_body_size = size;
        }

        Ok(config)
    }
}

fn parse_upstream(value: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        name: "APITAP_UPSTREAM_URL",
        reason,
    };
    let uri: Uri = value.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme `{other}`"))),
        None => return Err(invalid("missing scheme".to_string())),
    }
    if uri.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(uri)
}
