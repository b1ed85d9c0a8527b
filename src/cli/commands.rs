//! Top-level command tree

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Checkpoint directory used when `--checkpoint-dir` is omitted
pub const DEFAULT_CHECKPOINT_DIR: &str = ".checkpoints";

/// Account sweeper CLI
#[derive(Parser, Debug)]
#[command(name = "account-sweeper")]
#[command(about = "Resumable bulk operations over a user directory", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory holding checkpoint records
    #[arg(long, global = true, default_value = DEFAULT_CHECKPOINT_DIR)]
    pub checkpoint_dir: PathBuf,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and maintain checkpoints
    Checkpoints(super::CheckpointsCommand),

    /// Estimate how long a job over N items will take
    Estimate(super::EstimateArgs),

    /// Dry-run an input file through the batch engine without touching the directory
    Preview(super::PreviewArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
