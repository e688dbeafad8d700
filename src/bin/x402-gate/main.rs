//! x402-gate CLI entry point.

mod adapter;
mod cli;

use clap::Parser;
use cli::Cli;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use x402_gate::GateServiceBuilder;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("x402-gate v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;

    // Build the gate and its sweeper
    let service = GateServiceBuilder::new(config).build()?;

    let mut events = service.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("Gate event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} gate events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = adapter::router(service.gate(), service.protected_path());
    let listener = tokio::net::TcpListener::bind(service.listen_addr()).await?;
    info!(
        "Serving {} behind the gate on {}",
        service.protected_path(),
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(service.shutdown_signal())
        .await?;

    service.stop().await;
    info!("Goodbye!");
    Ok(())
}
