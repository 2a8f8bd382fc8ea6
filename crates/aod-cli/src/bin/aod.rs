//! aod
//!
//! Grants and cleans up time-bound IAM bindings through the Resource Manager API

use aod_cli::{load_config, rest_store, run, Cli};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = rest_store(&config)?;

    info!(endpoint = %config.store.endpoint, "starting aod");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    run(cli, config, store, &cancel, &mut stdout).await
}
