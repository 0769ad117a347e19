use apitap_core::ConfigError;
use apitap_export::TransportError;
use thiserror::Error;

/// Errors that stop the proxy from starting or serving.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot build collector transport: {0}")]
    Transport(#[from] TransportError),
}
