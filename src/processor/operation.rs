//! Per-item operation seam
//!
//! The remote-API client layer implements [`ItemOperation`]. Expected business
//! results (not found, already applied, ...) come back as an [`OutcomeKind`]
//! inside `Ok`; `Err` is reserved for conditions the processor must react to.

use crate::checkpoint::OperationType;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Result of applying an operation to one input item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// The operation was applied
    Success,
    /// Nothing to do (already applied, protected, ...)
    Skipped,
    /// No account matched the item
    NotFound,
    /// The item matched more than one account
    MultipleMatches,
    /// The item failed without aborting the run
    Error,
}

impl OutcomeKind {
    /// Lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::MultipleMatches => "multiple_matches",
            OutcomeKind::Error => "error",
        }
    }
}

/// Rate-limit headroom reported by the remote API alongside a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateHeadroom {
    /// Requests left in the current window
    pub remaining: u64,
    /// Window size
    pub limit: u64,
    /// Unix timestamp (seconds) at which the window resets
    pub reset_at: Option<i64>,
}

impl RateHeadroom {
    /// Remaining share of the window, 0.0..=1.0
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        (self.remaining as f64 / self.limit as f64).clamp(0.0, 1.0)
    }
}

/// Successful application of an operation to one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Outcome to count
    pub outcome: OutcomeKind,
    /// Headroom reported with the last response, if any
    pub headroom: Option<RateHeadroom>,
    /// Operation-specific sub-phase counts
    pub sub_counts: BTreeMap<String, u64>,
}

impl From<OutcomeKind> for Applied {
    fn from(outcome: OutcomeKind) -> Self {
        Self {
            outcome,
            headroom: None,
            sub_counts: BTreeMap::new(),
        }
    }
}

impl Applied {
    /// Attach rate-limit headroom
    pub fn with_headroom(mut self, headroom: RateHeadroom) -> Self {
        self.headroom = Some(headroom);
        self
    }

    /// Add to a sub-phase counter
    pub fn with_sub_count(mut self, name: impl Into<String>, count: u64) -> Self {
        *self.sub_counts.entry(name.into()).or_insert(0) += count;
        self
    }
}

/// Failure applying an operation to one item
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationError {
    /// The API asked us to slow down
    #[error("throttled by remote API")]
    Throttled {
        /// Server-provided wait, if any
        retry_after: Option<Duration>,
    },

    /// Network blip or 5xx; retried within the backoff budget
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The item is malformed; counted as an error outcome
    #[error("invalid item: {0}")]
    Validation(String),

    /// Credentials rejected; aborts the run
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Configuration does not match the target system; aborts the run
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OperationError {
    /// Whether the run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperationError::Authentication(_) | OperationError::Configuration(_)
        )
    }
}

/// A remote operation applied to one input item at a time
#[async_trait]
pub trait ItemOperation: Send + Sync {
    /// Operation type recorded in checkpoints
    fn operation_type(&self) -> OperationType;

    /// Apply the operation to `item`.
    ///
    /// Must be safe to repeat: re-applying to an item whose change already
    /// took effect reports [`OutcomeKind::Skipped`].
    async fn apply(&self, item: &str) -> Result<Applied, OperationError>;
}
