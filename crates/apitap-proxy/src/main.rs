use apitap_core::{load_dotenv, Environment};
use apitap_proxy::TapProxy;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    load_dotenv();

    let environment = Environment::current();
    let _ = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(environment.default_log_level())),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let proxy = match TapProxy::from_env() {
        Ok(proxy) => proxy,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    info!(environment = %environment, "starting apitap");

    match proxy.run().await {
        Ok(stats) => info!(
            sent = stats.sent,
            failed = stats.failed,
            dropped = stats.dropped,
            "apitap stopped"
        ),
        Err(e) => {
            error!(error = %e, "apitap exited with an error");
            std::process::exit(1);
        }
    }
}
