//! Configuration for the classifier and the telemetry pipeline.
//!
//! Settings are read once at startup from `APITAP_`-prefixed environment
//! variables (optionally seeded from a `.env` file) and validated into a
//! [`TapConfig`]. The classifier and assembler only ever see the parsed
//! form: typed sets, parsed status-code ranges and validated header names.
//!
//! # Example
//!
//! ```ignore
//! use apitap_core::config::{load_dotenv, TapConfig};
//!
//! load_dotenv();
//! let config = TapConfig::from_env()?;
//! if !config.is_enabled() {
//!     tracing::warn!("APITAP_TELEMETRY_ENDPOINT is not set, running as a passthrough");
//! }
//! ```

use crate::error::ConfigError;
use http::header::HeaderName;
use http::Uri;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Prefix shared by every apitap environment variable.
pub const ENV_PREFIX: &str = "APITAP_";

/// Default cap for captured request bodies: 256KB
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 262_144;

/// Default cap for captured response bodies: 1MB
pub const DEFAULT_MAX_RESPONSE_BODY_SIZE: usize = 1_048_576;

/// Header carrying the inbound correlation id.
pub const DEFAULT_CORRELATION_HEADER: &str = "x-request-id";

/// Header carrying the originating client IP.
pub const DEFAULT_SOURCE_IP_HEADER: &str = "cf-connecting-ip";

/// Deployment profile, detected from `APITAP_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Verbose logging.
    Development,
    /// Quiet logging.
    Production,
    /// Any other profile name.
    Custom(String),
}

impl Environment {
    /// Detect the current environment from `APITAP_ENV`.
    ///
    /// Returns:
    /// - `Production` if `APITAP_ENV` is "production" or "prod"
    /// - `Development` if `APITAP_ENV` is "development", "dev", or not set
    /// - `Custom(name)` for any other value
    pub fn current() -> Self {
        match std::env::var("APITAP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::Production,
            Ok("development") | Ok("dev") => Self::Development,
            Ok(other) => Self::Custom(other.to_string()),
            Err(_) => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Default log filter for this environment.
    ///
    /// - Development: "debug"
    /// - Production: "info"
    /// - Custom: "info"
    pub fn default_log_level(&self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production => "info",
            Self::Custom(_) => "info",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Load environment variables from a `.env` file in the working directory.
///
/// Missing files are ignored and existing variables are never overridden.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Load environment variables from a specific file path.
pub fn load_dotenv_from<P: AsRef<std::path::Path>>(path: P) {
    let _ = dotenvy::from_path(path);
}

/// Deserialize `APITAP_`-prefixed environment variables into `T`.
///
/// Field names map to SCREAMING_SNAKE_CASE after the prefix, so a field
/// `listen_addr` reads `APITAP_LISTEN_ADDR`.
pub fn from_env_prefixed<T: DeserializeOwned>() -> Result<T, ConfigError> {
    envy::prefixed(ENV_PREFIX)
        .from_env::<T>()
        .map_err(ConfigError::from)
}

/// Settings exactly as they arrive from the environment.
///
/// Everything is optional; list-valued settings are raw comma-separated
/// strings. Use [`TapConfig::from_raw`] to validate.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawTapConfig {
    /// `APITAP_EXCLUDED_HTTP_METHODS`, e.g. "OPTIONS,HEAD"
    #[serde(default)]
    pub excluded_http_methods: Option<String>,
    /// `APITAP_EXCLUDED_HEADERS`, e.g. "upgrade,x-internal-check"
    #[serde(default)]
    pub excluded_headers: Option<String>,
    /// `APITAP_EXCLUDED_STATUS_CODES`, e.g. "1xx,3xx,5xx"
    #[serde(default)]
    pub excluded_status_codes: Option<String>,
    #[serde(default)]
    pub max_request_body_size: Option<usize>,
    #[serde(default)]
    pub max_response_body_size: Option<usize>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub telemetry_endpoint: Option<String>,
    #[serde(default)]
    pub correlation_header: Option<String>,
    #[serde(default)]
    pub source_ip_header: Option<String>,
}

/// An inclusive status-code range built from a wildcard pattern like `4xx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCodePattern {
    pub low: u32,
    pub high: u32,
}

impl StatusCodePattern {
    /// The range an unparseable pattern degrades to. Only code 0 falls in it.
    pub const NONE: Self = Self { low: 0, high: 0 };

    /// Expand a wildcard pattern into a numeric range.
    ///
    /// Each `x`/`X` becomes `0` for the low bound and `9` for the high bound.
    /// Parsing takes the leading decimal digits after optional whitespace, so
    /// `" 4xx"` and `"404"` both work; anything without leading digits yields
    /// [`StatusCodePattern::NONE`].
    pub fn parse(pattern: &str) -> Self {
        let low = leading_number(&pattern.replace(['x', 'X'], "0"));
        let high = leading_number(&pattern.replace(['x', 'X'], "9"));
        match (low, high) {
            (Some(low), Some(high)) => Self { low, high },
            _ => Self::NONE,
        }
    }

    pub fn matches(&self, code: u32) -> bool {
        self.low <= code && code <= self.high
    }
}

fn leading_number(value: &str) -> Option<u32> {
    let trimmed = value.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Validated configuration shared by the classifier, assembler and pipeline.
///
/// Build it with [`TapConfig::from_env`] in production or with the builder
/// methods in tests:
///
/// ```ignore
/// use apitap_core::config::TapConfig;
///
/// let config = TapConfig::new()
///     .excluded_methods(["OPTIONS", "HEAD"])
///     .excluded_status_codes(["1xx", "3xx", "5xx"])
///     .max_request_body_size(64 * 1024)
///     .with_endpoint("https://collector.internal/v1/telemetry")?;
/// ```
#[derive(Clone)]
pub struct TapConfig {
    /// Upper-cased method names that are never treated as API traffic.
    pub(crate) excluded_methods: HashSet<String>,

    /// Lower-cased header names whose presence excludes a message.
    pub(crate) excluded_headers: HashSet<String>,

    pub(crate) excluded_status_codes: Vec<StatusCodePattern>,

    pub(crate) max_request_body_size: usize,

    pub(crate) max_response_body_size: usize,

    pub(crate) namespace: Option<String>,

    /// Collector URL. `None` turns the whole pipeline into a passthrough.
    pub(crate) telemetry_endpoint: Option<Uri>,

    pub(crate) correlation_header: HeaderName,

    pub(crate) source_ip_header: HeaderName,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TapConfig {
    /// Create a configuration with default values and no collector.
    ///
    /// Defaults:
    /// - No excluded methods, headers or status codes
    /// - Request body cap: 262144 bytes
    /// - Response body cap: 1048576 bytes
    /// - Correlation header: `x-request-id`
    /// - Source IP header: `cf-connecting-ip`
    pub fn new() -> Self {
        Self {
            excluded_methods: HashSet::new(),
            excluded_headers: HashSet::new(),
            excluded_status_codes: Vec::new(),
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
            max_response_body_size: DEFAULT_MAX_RESPONSE_BODY_SIZE,
            namespace: None,
            telemetry_endpoint: None,
            correlation_header: HeaderName::from_static(DEFAULT_CORRELATION_HEADER),
            source_ip_header: HeaderName::from_static(DEFAULT_SOURCE_IP_HEADER),
        }
    }

    /// Read and validate `APITAP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw: RawTapConfig = from_env_prefixed()?;
        Self::from_raw(raw)
    }

    /// Validate raw settings.
    ///
    /// Empty strings count as unset. A body cap of 0 falls back to the default.
    pub fn from_raw(raw: RawTapConfig) -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(methods) = raw.excluded_http_methods.as_deref() {
            config = config.excluded_methods(split_list(methods));
        }
        if let Some(headers) = raw.excluded_headers.as_deref() {
            for name in split_list(headers) {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    ConfigError::InvalidHeaderName(name.to_string(), "APITAP_EXCLUDED_HEADERS")
                })?;
            }
            config = config.excluded_headers(split_list(headers));
        }
        if let Some(codes) = raw.excluded_status_codes.as_deref() {
            config = config.excluded_status_codes(split_list(codes));
        }
        if let Some(size) = raw.max_request_body_size.filter(|size| *size > 0) {
            config = config.max_request_body_size(size);
        }
        if let Some(size) = raw.max_response_body_size.filter(|size| *size > 0) {
            config = config.max_response_body_size(size);
        }
        if let Some(namespace) = non_empty(raw.namespace) {
            config = config.namespace(namespace);
        }
        if let Some(header) = non_empty(raw.correlation_header) {
            config.correlation_header = parse_header_name(&header, "APITAP_CORRELATION_HEADER")?;
        }
        if let Some(header) = non_empty(raw.source_ip_header) {
            config.source_ip_header = parse_header_name(&header, "APITAP_SOURCE_IP_HEADER")?;
        }
        if let Some(endpoint) = non_empty(raw.telemetry_endpoint) {
            config = config.with_endpoint(&endpoint)?;
        }

        Ok(config)
    }

    /// Set the excluded HTTP methods (case-insensitive).
    pub fn excluded_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.excluded_methods = methods
            .into_iter()
            .map(|m| m.into().trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Set the excluded header names (case-insensitive, exact match).
    pub fn excluded_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.excluded_headers = headers
            .into_iter()
            .map(|h| h.into().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    /// Set the excluded status-code patterns (`4xx`, `503`, ...).
    pub fn excluded_status_codes<S: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.excluded_status_codes = patterns
            .into_iter()
            .map(|p| StatusCodePattern::parse(p.as_ref()))
            .collect();
        self
    }

    pub fn max_request_body_size(mut self, size: usize) -> Self {
        self.max_request_body_size = size;
        self
    }

    pub fn max_response_body_size(mut self, size: usize) -> Self {
        self.max_response_body_size = size;
        self
    }

    /// Set the deployment/tenant label reported as `destinationNamespace`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn correlation_header(mut self, header: HeaderName) -> Self {
        self.correlation_header = header;
        self
    }

    pub fn source_ip_header(mut self, header: HeaderName) -> Self {
        self.source_ip_header = header;
        self
    }

    /// Set the collector endpoint, enabling the pipeline.
    ///
    /// The URL must be absolute with an `http` or `https` scheme.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            value: endpoint.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = endpoint.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        }
        if uri.host().is_none() {
            return Err(invalid("missing host"));
        }
        self.telemetry_endpoint = Some(uri);
        Ok(self)
    }

    /// Whether a collector is configured. When false the pipeline is a pure passthrough.
    pub fn is_enabled(&self) -> bool {
        self.telemetry_endpoint.is_some()
    }

    pub fn telemetry_endpoint(&self) -> Option<&Uri> {
        self.telemetry_endpoint.as_ref()
    }

    pub fn request_body_limit(&self) -> usize {
        self.max_request_body_size
    }

    pub fn response_body_limit(&self) -> usize {
        self.max_response_body_size
    }

    pub fn namespace_label(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Header the request id is read from.
    pub fn correlation_header_name(&self) -> &HeaderName {
        &self.correlation_header
    }

    pub fn excluded_status_patterns(&self) -> &[StatusCodePattern] {
        &self.excluded_status_codes
    }

    pub(crate) fn is_excluded_method(&self, method: &str) -> bool {
        self.excluded_methods.contains(&method.to_ascii_uppercase())
    }

    pub(crate) fn is_excluded_header(&self, name: &str) -> bool {
        self.excluded_headers.contains(&name.to_ascii_lowercase())
    }
}

impl fmt::Debug for TapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapConfig")
            .field("excluded_methods", &self.excluded_methods)
            .field("excluded_headers", &self.excluded_headers)
            .field("excluded_status_codes", &self.excluded_status_codes)
            .field("max_request_body_size", &self.max_request_body_size)
            .field("max_response_body_size", &self.max_response_body_size)
            .field("namespace", &self.namespace)
            .field(
                "telemetry_endpoint",
                &self.telemetry_endpoint.as_ref().map(|u| u.to_string()),
            )
            .field("correlation_header", &self.correlation_header)
            .field("source_ip_header", &self.source_ip_header)
            .finish()
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_header_name(value: &str, setting: &'static str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(value.as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(value.to_string(), setting))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // ── StatusCodePattern ─────────────────────────────────────────

    #[test]
    fn test_pattern_wildcard_range() {
        assert_eq!(
            StatusCodePattern::parse("4xx"),
            StatusCodePattern { low: 400, high: 499 }
        );
        assert_eq!(
            StatusCodePattern::parse("5XX"),
            StatusCodePattern { low: 500, high: 599 }
        );
        assert_eq!(
            StatusCodePattern::parse("30x"),
            StatusCodePattern { low: 300, high: 309 }
        );
    }

    #[test]
    fn test_pattern_exact_code() {
        let pattern = StatusCodePattern::parse("404");
        assert_eq!(pattern, StatusCodePattern { low: 404, high: 404 });
        assert!(pattern.matches(404));
        assert!(!pattern.matches(405));
    }

    #[test]
    fn test_pattern_unparseable_matches_only_zero() {
        for raw in ["", "abc", "x", " ", "-4xx"] {
            let pattern = StatusCodePattern::parse(raw);
            // "x" expands to "0"/"9", which is a valid single-digit range
            if raw == "x" {
                assert_eq!(pattern, StatusCodePattern { low: 0, high: 9 });
                continue;
            }
            assert_eq!(pattern, StatusCodePattern::NONE, "pattern {raw:?}");
            assert!(!pattern.matches(200));
            assert!(pattern.matches(0));
        }
    }

    #[test]
    fn test_pattern_leading_whitespace_and_trailing_garbage() {
        assert_eq!(
            StatusCodePattern::parse(" 5xx"),
            StatusCodePattern { low: 500, high: 599 }
        );
        assert_eq!(
            StatusCodePattern::parse("4xx;"),
            StatusCodePattern { low: 400, high: 499 }
        );
    }

    // ── TapConfig ─────────────────────────────────────────────────

    #[test]
    fn test_default_config() {
        let config = TapConfig::new();
        assert_eq!(config.request_body_limit(), 262_144);
        assert_eq!(config.response_body_limit(), 1_048_576);
        assert!(!config.is_enabled());
        assert!(config.namespace_label().is_none());
        assert_eq!(config.correlation_header.as_str(), "x-request-id");
        assert_eq!(config.source_ip_header.as_str(), "cf-connecting-ip");
    }

    #[test]
    fn test_from_raw_parses_lists_once() {
        let raw = RawTapConfig {
            excluded_http_methods: Some("options, head,,".to_string()),
            excluded_headers: Some("Upgrade, X-Internal-Check".to_string()),
            excluded_status_codes: Some("1xx,3xx, 5xx".to_string()),
            ..Default::default()
        };
        let config = TapConfig::from_raw(raw).unwrap();

        assert!(config.is_excluded_method("OPTIONS"));
        assert!(config.is_excluded_method("HEAD"));
        assert!(!config.is_excluded_method("GET"));
        assert_eq!(config.excluded_methods.len(), 2);

        assert!(config.is_excluded_header("upgrade"));
        assert!(config.is_excluded_header("x-internal-check"));
        assert_eq!(config.excluded_headers.len(), 2);

        assert_eq!(
            config.excluded_status_patterns(),
            &[
                StatusCodePattern { low: 100, high: 199 },
                StatusCodePattern { low: 300, high: 399 },
                StatusCodePattern { low: 500, high: 599 },
            ]
        );
    }

    #[test]
    fn test_from_raw_zero_body_size_uses_default() {
        let raw = RawTapConfig {
            max_request_body_size: Some(0),
            max_response_body_size: Some(2048),
            ..Default::default()
        };
        let config = TapConfig::from_raw(raw).unwrap();
        assert_eq!(config.request_body_limit(), DEFAULT_MAX_REQUEST_BODY_SIZE);
        assert_eq!(config.response_body_limit(), 2048);
    }

    #[test]
    fn test_from_raw_empty_endpoint_disables_pipeline() {
        let raw = RawTapConfig {
            telemetry_endpoint: Some("   ".to_string()),
            ..Default::default()
        };
        let config = TapConfig::from_raw(raw).unwrap();
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(TapConfig::new()
            .with_endpoint("https://collector.example.com/ingest")
            .unwrap()
            .is_enabled());
        assert!(matches!(
            TapConfig::new().with_endpoint("/ingest"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            TapConfig::new().with_endpoint("ftp://collector/ingest"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let raw = RawTapConfig {
            excluded_headers: Some("good,bad header".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            TapConfig::from_raw(raw),
            Err(ConfigError::InvalidHeaderName(name, _)) if name == "bad header"
        ));
    }

    // ── Environment ───────────────────────────────────────────────

    #[test]
    #[serial]
    fn test_environment_detection() {
        std::env::remove_var("APITAP_ENV");
        assert!(Environment::current().is_development());

        std::env::set_var("APITAP_ENV", "prod");
        assert!(Environment::current().is_production());

        std::env::set_var("APITAP_ENV", "staging");
        assert_eq!(Environment::current().as_str(), "staging");
        assert_eq!(Environment::current().default_log_level(), "info");

        std::env::remove_var("APITAP_ENV");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("APITAP_EXCLUDED_HTTP_METHODS", "OPTIONS");
        std::env::set_var("APITAP_EXCLUDED_STATUS_CODES", "5xx");
        std::env::set_var("APITAP_MAX_RESPONSE_BODY_SIZE", "4096");
        std::env::set_var("APITAP_NAMESPACE", "edge-eu");
        std::env::set_var("APITAP_TELEMETRY_ENDPOINT", "http://127.0.0.1:9999/telemetry");

        let config = TapConfig::from_env().unwrap();
        assert!(config.is_excluded_method("OPTIONS"));
        assert_eq!(config.response_body_limit(), 4096);
        assert_eq!(config.namespace_label(), Some("edge-eu"));
        assert!(config.is_enabled());

        std::env::set_var("APITAP_MAX_RESPONSE_BODY_SIZE", "lots");
        assert!(matches!(TapConfig::from_env(), Err(ConfigError::Env(_))));

        for var in [
            "APITAP_EXCLUDED_HTTP_METHODS",
            "APITAP_EXCLUDED_STATUS_CODES",
            "APITAP_MAX_RESPONSE_BODY_SIZE",
            "APITAP_NAMESPACE",
            "APITAP_TELEMETRY_ENDPOINT",
        ] {
            std::env::remove_var(var);
        }
    }
}
