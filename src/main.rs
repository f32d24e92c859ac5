mod cli;

use clap::Parser;
use crl_service::{config::Config, setup::build_context, telemetry};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }
    result
}

async fn run(cli: Cli) -> color_eyre::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(backend = %config.store.backend, "Loaded configuration");

    let context = build_context(config).await?;
    cli.command.run(context).await
}
