//! Main entry point for the account-sweeper CLI

use account_sweeper::checkpoint::CheckpointStore;
use account_sweeper::cli::{Cli, CliError, Commands};
use account_sweeper::metrics;
use account_sweeper::shutdown::{self, ShutdownCoordinator};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("account_sweeper=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)
            .map_err(|e| CliError::ConfigurationError(format!("metrics exporter: {e}")))?;
        info!(%addr, "Prometheus exporter listening");
    }

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::install_ctrl_c_handler(shutdown.clone());

    match &cli.command {
        Commands::Checkpoints(cmd) => {
            let store = CheckpointStore::open(&cli.checkpoint_dir)?;
            cmd.execute(&store, cli.output_format)
        }
        Commands::Estimate(args) => args.execute(cli.output_format),
        Commands::Preview(args) => {
            args.execute(&cli.checkpoint_dir, cli.output_format, shutdown)
                .await
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = run(cli).await.map_err(|e| anyhow::anyhow!(e));

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
