//! Healthcheck UI binary

use anyhow::Context;
use clap::Parser;
use common::logging::{self, LogFormat};
use healthcheck_ui::{Config, HealthcheckUiServer, config::CONFIG_ENV_VAR};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "healthcheck-ui", version, about = "Health check status aggregation service")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration errors are fatal; tracing is not initialized yet.
    let mut config = Config::load_with(cli.config).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    let format = config
        .logging
        .format
        .as_deref()
        .map(LogFormat::from_name)
        .unwrap_or_default();
    logging::init_with(format, config.logging.level.as_deref().unwrap_or("info"));

    if cli.check {
        tracing::info!(
            endpoints = config.endpoints.len(),
            webhooks = config.webhooks.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    tracing::info!("Healthcheck UI starting");

    HealthcheckUiServer::new(config).run().await?;

    Ok(())
}
