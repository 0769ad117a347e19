//! Collector transport.
//!
//! A [`CollectorTransport`] ships one completed [`TelemetryRecord`]. The
//! production implementation is [`HttpCollector`], which POSTs the record as
//! JSON with `reqwest`.

use crate::error::TransportError;
use apitap_core::TelemetryRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Something that can deliver a telemetry record.
#[async_trait]
pub trait CollectorTransport: Send + Sync + 'static {
    async fn send(&self, record: &TelemetryRecord) -> Result<(), TransportError>;
}

/// Collector endpoint configuration.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// URL to POST records to.
    pub url: String,
    /// Extra headers sent with every POST.
    pub headers: Vec<(String, String)>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl CollectorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout_secs: 10,
        }
    }

    /// Add a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// POSTs each record as `application/json` to the collector.
///
/// # Example
///
/// ```ignore
/// use apitap_export::{CollectorConfig, HttpCollector};
///
/// let collector = HttpCollector::new(
///     CollectorConfig::new("https://collector.internal/v1/telemetry").timeout(5),
/// )?;
/// collector.send(&record).await?;
/// ```
#[derive(Clone, Debug)]
pub struct HttpCollector {
    config: CollectorConfig,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl CollectorTransport for HttpCollector {
    async fn send(&self, record: &TelemetryRecord) -> Result<(), TransportError> {
        let payload = record.to_json()?;

        let mut request = self
            .client
            .post(&self.config.url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(payload);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(request_id = %record.request_id, status = status.as_u16(), "telemetry delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_config_builder() {
        let config = CollectorConfig::new("http://collector.local/ingest")
            .header("authorization", "Bearer t0k3n")
            .timeout(3);
        assert_eq!(config.url, "http://collector.local/ingest");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.timeout_secs, 3);
    }

    #[test]
    fn test_http_collector_builds() {
        let collector = HttpCollector::new(CollectorConfig::new("http://collector.local/ingest"));
        assert_eq!(collector.unwrap().url(), "http://collector.local/ingest");
    }
}
