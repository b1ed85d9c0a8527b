//! Job descriptor, run status and result summary

use crate::checkpoint::{Checkpoint, Counters, OperationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Batch job specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Operation to apply to every item
    pub operation_type: OperationType,
    /// Target environment tag (e.g. "dev", "prod")
    pub environment: String,
    /// Reference to the input list (typically a file path)
    pub input_ref: Option<String>,
    /// Reference to the result artifact
    pub output_ref: Option<String>,
    /// Number of input items, if known up front
    pub total_items: Option<u64>,
}

impl BatchJob {
    /// Create a job over an input of unknown length
    pub fn new(operation_type: OperationType, environment: impl Into<String>) -> Self {
        Self {
            operation_type,
            environment: environment.into(),
            input_ref: None,
            output_ref: None,
            total_items: None,
        }
    }

    /// Set the input reference
    pub fn with_input_ref(mut self, input_ref: impl Into<String>) -> Self {
        self.input_ref = Some(input_ref.into());
        self
    }

    /// Set the output reference
    pub fn with_output_ref(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }

    /// Set the known item count
    pub fn with_total_items(mut self, total_items: u64) -> Self {
        self.total_items = Some(total_items);
        self
    }

    /// Validate the job before a run
    pub fn validate(&self) -> Result<(), String> {
        if self.environment.trim().is_empty() {
            return Err("environment must not be empty".to_string());
        }
        if self.input_ref.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err("input reference must not be blank".to_string());
        }
        Ok(())
    }
}

/// Processor state machine: `Idle -> Running -> {Completed, Failed, Interrupted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not started
    #[default]
    Idle,
    /// Processing batches
    Running,
    /// Input exhausted without a fatal error
    Completed,
    /// Aborted on a fatal error
    Failed,
    /// Stopped at a batch boundary on request; resumable
    Interrupted,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Summary returned when a run ends without a fatal error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    /// Checkpoint id, also the resume identifier
    pub checkpoint_id: String,
    /// How the run ended
    pub status: JobStatus,
    /// Durable cursor at the end of the run
    pub cursor: u64,
    /// Total items, if known
    pub total_items: Option<u64>,
    /// Cumulative counters, including items processed by earlier runs
    pub counters: Counters,
    /// Cumulative sub-phase counts
    pub sub_counts: BTreeMap<String, u64>,
    /// Batches recorded by this run
    pub batches: u64,
    /// Wall time of this run
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl JobResult {
    pub(crate) fn from_checkpoint(
        checkpoint: &Checkpoint,
        status: JobStatus,
        batches: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            checkpoint_id: checkpoint.id().to_string(),
            status,
            cursor: checkpoint.cursor(),
            total_items: checkpoint.total_items(),
            counters: *checkpoint.counters(),
            sub_counts: checkpoint.sub_counts().clone(),
            batches,
            elapsed,
        }
    }

    /// Whether the run can be continued with the same checkpoint id
    pub fn is_resumable(&self) -> bool {
        self.status == JobStatus::Interrupted
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
