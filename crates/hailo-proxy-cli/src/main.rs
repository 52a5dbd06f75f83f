//! CLI entry point.
//!
//! Loads `.env`, parses flags into a [`hailo_proxy::ProxyConfig`], binds the
//! listener and serves until Ctrl-C.

mod parser;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parser::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads them
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let bind_addr = cli.bind_addr();
    let config = cli.into_config();

    // Bind FIRST so a port conflict fails before anything else starts
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {bind_addr}: {e}"))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    hailo_proxy::serve(listener, config, cancel).await
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
