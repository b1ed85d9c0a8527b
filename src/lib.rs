//! # Account Sweeper Library
//!
//! A resumable, rate-adaptive batch engine for bulk operations against a
//! remote user directory: deleting, blocking or revoking accounts from an
//! input list, and unlinking social identities with automatic cleanup of
//! the accounts left behind.
//!
//! ## Features
//!
//! - **Resumable jobs**: progress is checkpointed atomically after every
//!   batch; an interrupted or failed job continues from its last durable cursor
//! - **Rate adaptation**: pacing follows reported rate-limit headroom,
//!   throttling triggers exponential backoff and shrinks the next batch
//! - **Cooperative shutdown**: Ctrl-C stops at the next batch boundary or
//!   mid-pause without losing recorded progress; a second Ctrl-C exits at once
//! - **Identity categorization**: a pure delete / unlink / protect decision per
//!   account, re-applied after each unlink
//!
//! ## Quick Start
//!
//! ```no_run
//! use account_sweeper::checkpoint::{CheckpointStore, OperationType};
//! use account_sweeper::identity::{IdentityCategorizer, IdentityDirectory, SocialUnlinkOperation};
//! use account_sweeper::input::FileInput;
//! use account_sweeper::processor::{BatchJob, BatchProcessor, RateLimitConfig};
//!
//! # async fn example(directory: impl IdentityDirectory) -> Result<(), Box<dyn std::error::Error>> {
//! let store = CheckpointStore::open(".checkpoints")?;
//! let operation = SocialUnlinkOperation::new(directory, IdentityCategorizer::default());
//!
//! let total = account_sweeper::input::count_items("identities.txt")?;
//! let job = BatchJob::new(OperationType::SocialUnlink, "prod")
//!     .with_input_ref("identities.txt")
//!     .with_total_items(total);
//!
//! let mut processor = BatchProcessor::new(&store, RateLimitConfig::default());
//! let result = processor
//!     .run(&job, FileInput::open("identities.txt")?, &operation)
//!     .await?;
//! println!("{} -> {}", result.checkpoint_id, result.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`checkpoint`] - durable job progress records and their store
//! - [`processor`] - batch loop, pacing, retry and resume
//! - [`identity`] - identity categorization and the unlink protocol
//! - [`input`] - lazy file-backed input sequences
//! - [`shutdown`] - cooperative interruption
//! - [`metrics`] - Prometheus metrics
//! - [`cli`] - command-line interface

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Checkpoint records and the on-disk store
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Identity categorization and two-phase unlink
pub mod identity;

/// Input sequences
pub mod input;

/// Metrics collection and Prometheus exporter
pub mod metrics;

/// Batch orchestration with rate adaptation and resume
pub mod processor;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore, OperationType};
pub use processor::{BatchJob, BatchProcessor, JobResult, ProcessError};
