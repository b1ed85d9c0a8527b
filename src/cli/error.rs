//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::input::InputError;
use crate::processor::ProcessError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Checkpoint store error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Job error
    #[error("job error: {0}")]
    ProcessError(#[from] ProcessError),

    /// Input file error
    #[error("input error: {0}")]
    InputError(#[from] InputError),

    /// JSON rendering error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
