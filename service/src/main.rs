#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

use clap::Parser;
use isla_server::{
    app::{build_router, AppState},
    config::Config,
};
use tracing_subscriber::EnvFilter;

/// Isla Reader server: key issuance, Notion OAuth relay and usage metrics.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// YAML configuration file, overridden by ISLA_* environment variables
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Load and validate configuration first (fail-fast)
    let config = Config::load_from(&cli.config).map_err(|e| anyhow::anyhow!("{e}"))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        require_https = config.server.require_https,
        notion_configured = config.notion.credentials().is_some(),
        "isla-server starting up"
    );

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;

    let state = AppState::from_config(config)?;
    tracing::info!(
        path = %state.metrics.path().display(),
        retained = state.metrics.len(),
        "metrics store ready"
    );
    let app = build_router(state);

    tracing::info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
