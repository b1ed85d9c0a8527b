//! CLI command implementations

pub mod checkpoints;
pub mod commands;
pub mod error;
pub mod estimate;
pub mod preview;

pub use checkpoints::CheckpointsCommand;
pub use commands::{Cli, Commands, OutputFormat, DEFAULT_CHECKPOINT_DIR};
pub use error::CliError;
pub use estimate::EstimateArgs;
pub use preview::{PreviewArgs, PreviewOperation};
