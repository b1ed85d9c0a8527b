//! Resumable batch processing
//!
//! The processor walks an input sequence in bounded batches, applies an
//! [`ItemOperation`] to each item, paces requests through a per-job
//! [`RateController`] and records progress in a [`CheckpointStore`] after
//! every batch.
//!
//! # Components
//!
//! - [`executor`] - [`BatchProcessor`], the batch loop
//! - [`resume`] - [`ResumeCoordinator`], re-entry from a checkpoint
//! - [`rate_limit`] - adaptive pacing and throttling backoff
//! - [`operation`] - the per-item collaborator seam
//! - [`progress`] - structured progress events
//! - [`job`] - job descriptor, status and result
//! - [`config`] - constants and batch sizing
//!
//! # Error Handling
//!
//! Item-level failures become counters and never leave the item loop unless
//! they are fatal (authentication, configuration, checkpoint corruption,
//! exhausted throttling budget). Fatal errors mark the checkpoint failed and
//! come back as [`ProcessError::JobFailed`] carrying the resume id and the
//! last durable cursor.
//!
//! [`CheckpointStore`]: crate::checkpoint::CheckpointStore

pub mod config;
pub mod executor;
pub mod job;
pub mod operation;
pub mod progress;
pub mod rate_limit;
pub mod resume;

pub use config::{batch_size_for, estimated_duration, ProcessorConfig};
pub use executor::BatchProcessor;
pub use job::{BatchJob, JobResult, JobStatus};
pub use operation::{Applied, ItemOperation, OperationError, OutcomeKind, RateHeadroom};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use rate_limit::{ApiResponse, RateController, RateLimitConfig, RateLimitError};
pub use resume::ResumeCoordinator;

use crate::checkpoint::CheckpointError;
use crate::input::InputError;

/// Errors raised by job orchestration
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Throttled on every attempt for one item
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Attempts made
        attempts: u32,
    },

    /// Remote kept failing transiently
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Malformed job or item
    #[error("validation error: {0}")]
    Validation(String),

    /// Persisted record is unreadable or invalid
    #[error("checkpoint corruption: {0}")]
    CheckpointCorruption(String),

    /// Resume request does not match the checkpoint
    #[error("checkpoint incompatible: {0}")]
    CheckpointIncompatible(String),

    /// No such checkpoint
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Another active run covers the same job
    #[error("duplicate run: checkpoint {existing} is still active")]
    DuplicateRun {
        /// Id of the active checkpoint
        existing: String,
    },

    /// Contract violation in the processor or store
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Checkpoint storage failed
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    /// Authentication or configuration failure reported by the operation
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Input could not be read
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// A run aborted; the checkpoint is marked failed
    #[error("job {checkpoint_id} failed at cursor {last_cursor}: {source}")]
    JobFailed {
        /// Resume identifier
        checkpoint_id: String,
        /// Last durably recorded cursor
        last_cursor: u64,
        /// Cause
        #[source]
        source: Box<ProcessError>,
    },
}

impl ProcessError {
    /// Whether the error aborts a run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProcessError::Validation(_))
    }

    /// The underlying cause, looking through [`ProcessError::JobFailed`]
    pub fn root(&self) -> &ProcessError {
        match self {
            ProcessError::JobFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Resume identifier, if the error came from a started run
    pub fn checkpoint_id(&self) -> Option<&str> {
        match self {
            ProcessError::JobFailed { checkpoint_id, .. } => Some(checkpoint_id),
            _ => None,
        }
    }
}

impl From<CheckpointError> for ProcessError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::NotFound(id) => ProcessError::CheckpointNotFound(id),
            CheckpointError::AlreadyActive { existing } => ProcessError::DuplicateRun { existing },
            CheckpointError::Incompatible { .. } => {
                ProcessError::CheckpointIncompatible(err.to_string())
            }
            CheckpointError::InvalidStateTransition { .. }
            | CheckpointError::InconsistentDelta(_)
            | CheckpointError::CursorOutOfRange { .. } => {
                ProcessError::InvalidStateTransition(err.to_string())
            }
            e if e.is_corruption() => ProcessError::CheckpointCorruption(e.to_string()),
            e => ProcessError::Storage(e.to_string()),
        }
    }
}

impl From<RateLimitError> for ProcessError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::ThrottleBudgetExhausted { attempts } => {
                ProcessError::RateLimitExceeded { attempts }
            }
            RateLimitError::TransientBudgetExhausted { .. } => {
                ProcessError::TransientRemote(err.to_string())
            }
        }
    }
}
