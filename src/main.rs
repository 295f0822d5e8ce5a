//! podwarden - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use podwarden::{
    cli::{Cli, run_command},
    config::Config,
    orchestrator::PodOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podwarden=info"));

    // Logs go to stderr so `--json` output on stdout stays parseable
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    let config = Config::from_env()?;
    tracing::debug!("Loaded configuration: {:?}", config);

    let orchestrator = PodOrchestrator::new(config)?;
    run_command(cli.command, &orchestrator, cli.json).await
}
