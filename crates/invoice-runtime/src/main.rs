//! Hold-invoice service executable

use anyhow::{Context, Result};
use invoice_runtime::{init_logging, InvoiceRuntime, RuntimeConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.telemetry).context("Failed to initialize logging")?;

    let runtime = InvoiceRuntime::new(config)?;
    info!("Service is running. Press Ctrl+C to stop.");

    runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
}
