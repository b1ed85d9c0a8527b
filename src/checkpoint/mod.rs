//! Durable job progress
//!
//! One JSON record per job run, written atomically (temp file + rename, with a
//! backup of the previous version kept until the replace succeeds) and guarded
//! by an advisory directory lock so that two processes cannot start the same
//! job at once.

pub mod lock;
pub mod record;
pub mod store;

pub use lock::StoreLock;
pub use record::{
    Checkpoint, CheckpointDelta, CheckpointStatus, CheckpointSummary, Counters, OperationType,
};
pub use store::{CheckpointFilter, CheckpointStore, InputShape, PruneRule, ResumeRequest};

/// Errors raised by checkpoint persistence and validation
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// No record with this id exists
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    /// An active checkpoint already covers the same input, operation and environment
    #[error("an active checkpoint already exists for this job: {existing}")]
    AlreadyActive {
        /// Id of the existing active checkpoint
        existing: String,
    },

    /// The persisted record could not be read back as a valid checkpoint
    #[error("checkpoint {id} is corrupted: {reason}")]
    Corrupted {
        /// Checkpoint id
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// Record was written by an incompatible schema version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Record file exceeds the size limit
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Operation not valid for the record's current status
    #[error("invalid state transition for {id}: cannot {action} a {from} checkpoint")]
    InvalidStateTransition {
        /// Checkpoint id
        id: String,
        /// Status the record was in
        from: CheckpointStatus,
        /// Attempted action
        action: &'static str,
    },

    /// A progress delta violated the record's invariants
    #[error("inconsistent progress update: {0}")]
    InconsistentDelta(String),

    /// Advancing the cursor would move past the known input length
    #[error("cursor {cursor} would exceed total items {total}")]
    CursorOutOfRange {
        /// Cursor after the update
        cursor: u64,
        /// Known total
        total: u64,
    },

    /// Resume request does not match the stored record
    #[error("checkpoint {id} cannot be resumed: {reason}")]
    Incompatible {
        /// Checkpoint id
        id: String,
        /// Why
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}

impl CheckpointError {
    /// Whether the record itself is unreadable or invalid on disk
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CheckpointError::Corrupted { .. }
                | CheckpointError::SchemaVersionMismatch { .. }
                | CheckpointError::StateTooLarge { .. }
        )
    }
}
