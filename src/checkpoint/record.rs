//! Checkpoint record types
//!
//! A [`Checkpoint`] is the single durable progress record of one job run. Its
//! cursor is a 0-based offset into the (ordered) input sequence and only ever
//! moves forward; the outcome counters only ever grow, and at every durable
//! boundary `counters.processed == cursor`.

use super::CheckpointError;
use crate::processor::OutcomeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Kind of bulk operation a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Delete accounts
    BatchDelete,
    /// Block accounts
    BatchBlock,
    /// Revoke all grants/sessions of accounts
    RevokeGrants,
    /// Export last-login timestamps
    ExportLastLogin,
    /// Resolve account ids to email addresses
    FetchEmails,
    /// Report accounts that are still unblocked
    CheckUnblocked,
    /// Unlink a social identity, deleting accounts left without one
    SocialUnlink,
}

impl OperationType {
    /// All operation types
    pub const ALL: [OperationType; 7] = [
        OperationType::BatchDelete,
        OperationType::BatchBlock,
        OperationType::RevokeGrants,
        OperationType::ExportLastLogin,
        OperationType::FetchEmails,
        OperationType::CheckUnblocked,
        OperationType::SocialUnlink,
    ];

    /// Stable snake_case name, also used in checkpoint ids
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::BatchDelete => "batch_delete",
            OperationType::BatchBlock => "batch_block",
            OperationType::RevokeGrants => "revoke_grants",
            OperationType::ExportLastLogin => "export_last_login",
            OperationType::FetchEmails => "fetch_emails",
            OperationType::CheckUnblocked => "check_unblocked",
            OperationType::SocialUnlink => "social_unlink",
        }
    }

    /// Whether items must go through identity categorization before mutation
    pub fn is_identity_sensitive(&self) -> bool {
        matches!(self, OperationType::SocialUnlink)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        OperationType::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| format!("Invalid operation type: {s}"))
    }
}

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Job in progress or interrupted; resumable
    Active,
    /// Every input item was processed
    Completed,
    /// Job aborted on an unrecoverable error
    Failed,
}

impl CheckpointStatus {
    /// Completed and failed records accept no further progress updates
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckpointStatus::Active)
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointStatus::Active => "active",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(CheckpointStatus::Active),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            _ => Err(format!(
                "Invalid checkpoint status: {s}. Valid options: active, completed, failed"
            )),
        }
    }
}

/// Per-outcome item counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Items attempted (sum of every outcome below)
    pub processed: u64,
    /// Items whose operation was applied
    pub succeeded: u64,
    /// Items that needed no change (already applied, protected, ...)
    pub skipped: u64,
    /// Items that failed non-fatally
    pub errored: u64,
    /// Items the directory had no account for
    pub not_found: u64,
    /// Items that resolved to more than one account
    pub multiple_matches: u64,
}

impl Counters {
    /// Count one item with the given outcome
    pub fn record(&mut self, outcome: OutcomeKind) {
        self.processed += 1;
        match outcome {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::NotFound => self.not_found += 1,
            OutcomeKind::MultipleMatches => self.multiple_matches += 1,
            OutcomeKind::Error => self.errored += 1,
        }
    }

    /// Add another set of counters onto this one
    pub fn merge(&mut self, other: &Counters) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.errored += other.errored;
        self.not_found += other.not_found;
        self.multiple_matches += other.multiple_matches;
    }

    /// Sum of the individual outcome counters
    pub fn outcome_total(&self) -> u64 {
        self.succeeded + self.skipped + self.errored + self.not_found + self.multiple_matches
    }

    /// `processed` equals the sum of outcomes
    pub fn is_consistent(&self) -> bool {
        self.processed == self.outcome_total()
    }
}

/// Progress produced by one batch, merged into a checkpoint by
/// [`CheckpointStore::update`](super::CheckpointStore::update)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointDelta {
    /// Outcome counts of the batch; `counters.processed` is the cursor advance
    pub counters: Counters,
    /// Batch size to use from now on, if it changed
    pub batch_size: Option<usize>,
    /// Operation-specific sub-phase counts
    pub sub_counts: BTreeMap<String, u64>,
}

impl CheckpointDelta {
    /// Count one item with the given outcome
    pub fn record(&mut self, outcome: OutcomeKind) {
        self.counters.record(outcome);
    }

    /// Add operation-specific sub-phase counts
    pub fn add_sub_counts(&mut self, counts: &BTreeMap<String, u64>) {
        for (name, count) in counts {
            *self.sub_counts.entry(name.clone()).or_insert(0) += count;
        }
    }

    /// Number of input items this delta covers
    pub fn items(&self) -> u64 {
        self.counters.processed
    }

    /// Whether the delta carries no progress
    pub fn is_empty(&self) -> bool {
        self.counters.processed == 0 && self.sub_counts.is_empty() && self.batch_size.is_none()
    }
}

/// Durable progress record of one job run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    id: String,
    operation_type: OperationType,
    status: CheckpointStatus,
    environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_ref: Option<String>,
    total_items: Option<u64>,
    cursor: u64,
    batch_size: usize,
    counters: Counters,
    #[serde(default)]
    sub_counts: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a fresh active checkpoint at cursor 0
    pub fn new(
        id: String,
        operation_type: OperationType,
        environment: String,
        total_items: Option<u64>,
        batch_size: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            id,
            operation_type,
            status: CheckpointStatus::Active,
            environment,
            input_ref: None,
            output_ref: None,
            total_items,
            cursor: 0,
            batch_size,
            counters: Counters::default(),
            sub_counts: BTreeMap::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the input reference
    pub fn with_input_ref(mut self, input_ref: Option<String>) -> Self {
        self.input_ref = input_ref;
        self
    }

    /// Attach the output reference
    pub fn with_output_ref(mut self, output_ref: Option<String>) -> Self {
        self.output_ref = output_ref;
        self
    }

    /// Get the schema version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Get the checkpoint id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the operation type
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Get the status
    pub fn status(&self) -> CheckpointStatus {
        self.status
    }

    /// Get the environment tag
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the input reference
    pub fn input_ref(&self) -> Option<&str> {
        self.input_ref.as_deref()
    }

    /// Get the output reference
    pub fn output_ref(&self) -> Option<&str> {
        self.output_ref.as_deref()
    }

    /// Get the total item count, if known at job start
    pub fn total_items(&self) -> Option<u64> {
        self.total_items
    }

    /// Get the cursor
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Get the current batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get the outcome counters
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Get the operation-specific sub-phase counts
    pub fn sub_counts(&self) -> &BTreeMap<String, u64> {
        &self.sub_counts
    }

    /// Get the error that failed the job, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Get the creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last update timestamp
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Items still to process, if the total is known
    pub fn remaining_items(&self) -> Option<u64> {
        self.total_items
            .map(|total| total.saturating_sub(self.cursor))
    }

    /// Whether the cursor reached the known end of input
    pub fn is_exhausted(&self) -> bool {
        self.total_items.is_some_and(|total| self.cursor >= total)
    }

    /// Active records can be resumed
    pub fn is_resumable(&self) -> bool {
        self.status == CheckpointStatus::Active && self.schema_version == SCHEMA_VERSION
    }

    /// Completion percentage (0-100), if the total is known
    pub fn completion_percentage(&self) -> Option<f64> {
        self.total_items.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.cursor as f64 / total as f64) * 100.0
            }
        })
    }

    /// Share of processed items that succeeded (0-100)
    pub fn success_rate(&self) -> f64 {
        if self.counters.processed == 0 {
            return 0.0;
        }
        (self.counters.succeeded as f64 / self.counters.processed as f64) * 100.0
    }

    /// Merge a batch delta: counters add, cursor advances, `updated_at` refreshes.
    ///
    /// Fails without modifying the record when it is terminal or when the
    /// delta would break an invariant.
    pub fn apply_delta(&mut self, delta: &CheckpointDelta) -> Result<(), CheckpointError> {
        if self.status.is_terminal() {
            return Err(CheckpointError::InvalidStateTransition {
                id: self.id.clone(),
                from: self.status,
                action: "update",
            });
        }

        if !delta.counters.is_consistent() {
            return Err(CheckpointError::InconsistentDelta(format!(
                "processed ({}) does not match the sum of outcomes ({})",
                delta.counters.processed,
                delta.counters.outcome_total()
            )));
        }

        if delta.batch_size == Some(0) {
            return Err(CheckpointError::InconsistentDelta(
                "batch size must be at least 1".to_string(),
            ));
        }

        let cursor = self.cursor + delta.items();
        if let Some(total) = self.total_items {
            if cursor > total {
                return Err(CheckpointError::CursorOutOfRange { cursor, total });
            }
        }

        self.cursor = cursor;
        self.counters.merge(&delta.counters);
        for (name, count) in &delta.sub_counts {
            *self.sub_counts.entry(name.clone()).or_insert(0) += count;
        }
        if let Some(batch_size) = delta.batch_size {
            self.batch_size = batch_size;
        }
        self.touch();
        Ok(())
    }

    /// Terminal transition to completed
    pub fn mark_completed(&mut self) -> Result<(), CheckpointError> {
        self.transition(CheckpointStatus::Completed, "complete")?;
        self.last_error = None;
        Ok(())
    }

    /// Terminal transition to failed, keeping the error for the operator
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), CheckpointError> {
        self.transition(CheckpointStatus::Failed, "fail")?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Operator-initiated `failed -> active` transition so the job can be resumed
    pub fn reactivate(&mut self) -> Result<(), CheckpointError> {
        if self.status != CheckpointStatus::Failed {
            return Err(CheckpointError::InvalidStateTransition {
                id: self.id.clone(),
                from: self.status,
                action: "reactivate",
            });
        }
        self.status = CheckpointStatus::Active;
        self.touch();
        Ok(())
    }

    /// Check the invariants a persisted record must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.counters.is_consistent() {
            return Err(format!(
                "processed ({}) does not match the sum of outcomes ({})",
                self.counters.processed,
                self.counters.outcome_total()
            ));
        }
        if self.counters.processed != self.cursor {
            return Err(format!(
                "processed ({}) does not match cursor ({})",
                self.counters.processed, self.cursor
            ));
        }
        if let Some(total) = self.total_items {
            if self.cursor > total {
                return Err(format!("cursor ({}) exceeds total items ({total})", self.cursor));
            }
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch size is zero".to_string());
        }
        Ok(())
    }

    /// Summary used by list/show output
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            operation_type: self.operation_type,
            status: self.status,
            environment: self.environment.clone(),
            input_ref: self.input_ref.clone(),
            output_ref: self.output_ref.clone(),
            total_items: self.total_items,
            cursor: self.cursor,
            remaining_items: self.remaining_items(),
            completion_percentage: self.completion_percentage(),
            success_rate: self.success_rate(),
            counters: self.counters,
            sub_counts: self.sub_counts.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            resumable: self.is_resumable(),
        }
    }

    fn transition(
        &mut self,
        to: CheckpointStatus,
        action: &'static str,
    ) -> Result<(), CheckpointError> {
        if self.status.is_terminal() {
            return Err(CheckpointError::InvalidStateTransition {
                id: self.id.clone(),
                from: self.status,
                action,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }
}

/// Flattened view of a checkpoint for display and JSON output
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    /// Checkpoint id
    pub id: String,
    /// Operation type
    pub operation_type: OperationType,
    /// Status
    pub status: CheckpointStatus,
    /// Environment tag
    pub environment: String,
    /// Input reference
    pub input_ref: Option<String>,
    /// Output reference
    pub output_ref: Option<String>,
    /// Total items, if known
    pub total_items: Option<u64>,
    /// Cursor
    pub cursor: u64,
    /// Items still to process, if known
    pub remaining_items: Option<u64>,
    /// Completion percentage, if known
    pub completion_percentage: Option<f64>,
    /// Success rate of processed items
    pub success_rate: f64,
    /// Outcome counters
    pub counters: Counters,
    /// Sub-phase counts
    pub sub_counts: BTreeMap<String, u64>,
    /// Failure reason
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Whether the checkpoint can be resumed as-is
    pub resumable: bool,
}
