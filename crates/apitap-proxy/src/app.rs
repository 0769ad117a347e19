//! Proxy assembly: configuration in, running listener out.

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::forward::UpstreamForwarder;
use crate::middleware::{AccessLogLayer, LayerStack, TelemetryLayer};
use crate::server::Server;
use apitap_core::TapConfig;
use apitap_export::{
    CollectorConfig, CollectorTransport, DispatchStats, DispatchSupervisor, HttpCollector,
    TelemetryDispatcher,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// A configured apitap proxy.
///
/// ```rust,ignore
/// use apitap_proxy::TapProxy;
///
/// #[tokio::main]
/// async fn main() -> Result<(), apitap_proxy::ProxyError> {
///     let stats = TapProxy::from_env()?.run().await?;
///     println!("{} records delivered", stats.sent);
///     Ok(())
/// }
/// ```
pub struct TapProxy {
    tap: Arc<TapConfig>,
    proxy: ProxyConfig,
    transport: Option<Arc<dyn CollectorTransport>>,
    access_log: AccessLogLayer,
}

impl TapProxy {
    pub fn new(tap: TapConfig, proxy: ProxyConfig) -> Self {
        let access_log =
            AccessLogLayer::new().correlation_header(tap.correlation_header_name().clone());
        Self {
            tap: Arc::new(tap),
            proxy,
            transport: None,
            access_log,
        }
    }

    /// Read both configurations from `APITAP_*` variables.
    pub fn from_env() -> Result<Self, ProxyError> {
        Ok(Self::new(TapConfig::from_env()?, ProxyConfig::from_env()?))
    }

    /// Deliver records through `transport` instead of POSTing to the
    /// configured endpoint. Telemetry still requires an endpoint to be set.
    pub fn with_transport(mut self, transport: Arc<dyn CollectorTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the access log layer.
    pub fn access_log(mut self, layer: AccessLogLayer) -> Self {
        self.access_log = layer;
        self
    }

    pub fn tap_config(&self) -> &TapConfig {
        &self.tap
    }

    pub fn proxy_config(&self) -> &ProxyConfig {
        &self.proxy
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<DispatchStats, ProxyError> {
        let listener = TcpListener::bind(self.proxy.listen_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// Returns the dispatcher counters once queued telemetry has drained.
    /// Connection draining and telemetry draining share the configured
    /// shutdown grace.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<DispatchStats, ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr()?;
        let (telemetry, supervisor) = self.telemetry_layer()?;

        let layers = LayerStack::new()
            .layer(self.access_log.clone())
            .layer(telemetry);
        let handler = UpstreamForwarder::new(self.proxy.upstream.clone())
            .body_limit(self.proxy.max_buffered_body_size)
            .into_handler();
        let server = Server::new(
            layers,
            handler,
            &self.proxy.public_scheme,
            self.proxy.shutdown_grace,
            self.proxy.max_buffered_body_size,
        );

        info!(
            addr = %local_addr,
            upstream = %self.proxy.upstream,
            telemetry = supervisor.is_some(),
            "apitap proxy listening"
        );

        let served = server.serve(listener, shutdown).await;
        let drained = served.as_ref().copied().unwrap_or(Duration::ZERO);

        let stats = match supervisor {
            Some(supervisor) => {
                supervisor
                    .shutdown(remaining_grace(self.proxy.shutdown_grace, drained))
                    .await
            }
            None => DispatchStats::default(),
        };

        if let Err(e) = served {
            error!(error = %e, "listener failed");
            return Err(e.into());
        }
        Ok(stats)
    }

    fn telemetry_layer(&self) -> Result<(TelemetryLayer, Option<DispatchSupervisor>), ProxyError> {
        let Some(endpoint) = self.tap.telemetry_endpoint() else {
            warn!("APITAP_TELEMETRY_ENDPOINT is not set, running as a plain proxy");
            return Ok((TelemetryLayer::passthrough(self.tap.clone()), None));
        };

        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                let collector = CollectorConfig::new(endpoint.to_string())
                    .timeout(self.proxy.transport_timeout.as_secs());
                Arc::new(HttpCollector::new(collector)?) as Arc<dyn CollectorTransport>
            }
        };

        let (dispatcher, supervisor) =
            TelemetryDispatcher::spawn(transport, self.tap.clone(), self.proxy.dispatch);
        Ok((TelemetryLayer::new(self.tap.clone(), dispatcher), Some(supervisor)))
    }
}

/// What is left of the shutdown budget once connections have drained.
fn remaining_grace(grace: Duration, drained: Duration) -> Duration {
    grace.saturating_sub(drained)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
