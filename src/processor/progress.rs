//! Structured progress events for long-running jobs.
//!
//! The processor emits [`ProgressEvent`]s to a [`ProgressSink`]; rendering is
//! the sink's business. [`TracingProgress`] is the default sink and logs
//! throttled "[PROGRESS] ..." lines with rate and remaining-time estimates.

use super::job::JobStatus;
use super::operation::OutcomeKind;
use crate::checkpoint::{Counters, OperationType};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_JOB_DURATION: Duration = Duration::from_secs(30);

/// Something the processor did
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A run (fresh or resumed) began
    JobStarted {
        /// Checkpoint id
        checkpoint_id: String,
        /// Operation
        operation_type: OperationType,
        /// Total items, if known
        total_items: Option<u64>,
        /// Cursor the run starts from
        cursor: u64,
        /// Initial batch size
        batch_size: usize,
    },
    /// A batch began
    BatchStarted {
        /// 1-based batch number within this run
        batch: u64,
        /// Cursor at the start of the batch
        start_cursor: u64,
    },
    /// One item finished
    ItemProcessed {
        /// Input offset of the item
        index: u64,
        /// The item
        item: String,
        /// Outcome counted for it
        outcome: OutcomeKind,
    },
    /// A request was throttled and will be retried
    Throttled {
        /// The item being retried
        item: String,
        /// Attempt that was throttled (1-based)
        attempt: u32,
        /// Backoff before the next attempt
        wait: Duration,
    },
    /// A batch was durably recorded
    BatchCheckpointed {
        /// Batch number within this run
        batch: u64,
        /// Cursor after the batch
        cursor: u64,
        /// Cumulative counters after the batch
        counters: Counters,
    },
    /// The run ended
    JobFinished {
        /// Final status of this run
        status: JobStatus,
        /// Cursor at the end
        cursor: u64,
        /// Cumulative counters
        counters: Counters,
        /// Wall time of this run
        elapsed: Duration,
    },
}

/// Receiver of progress events
pub trait ProgressSink: Send {
    /// Handle one event
    fn on_event(&mut self, event: &ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_event(&mut self, _event: &ProgressEvent) {}
}

/// Progress state of one run
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Absolute number of processed items (the cursor)
    pub items_processed: u64,
    /// Cursor this run started from
    pub start_cursor: u64,
    /// Total expected items (if known)
    pub total_expected: Option<u64>,
    /// When this run started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Items per second in this run
    pub current_rate: f64,
    /// Last reported completion percentage
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create state for a run starting at `start_cursor`
    pub fn new(total_expected: Option<u64>, start_cursor: u64) -> Self {
        let now = Instant::now();
        let mut state = Self {
            items_processed: start_cursor,
            start_cursor,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        };
        state.last_reported_percentage = state.percentage().unwrap_or(0.0);
        state
    }

    /// Move to absolute cursor `cursor`
    pub fn update(&mut self, cursor: u64) {
        self.items_processed = cursor.max(self.items_processed);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let done = self.items_processed.saturating_sub(self.start_cursor);
            self.current_rate = done as f64 / elapsed;
        }
    }

    /// Whether a progress line is due, by percentage step or elapsed time
    pub fn should_emit_update(&self) -> bool {
        if self.items_processed == self.start_cursor {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_JOB_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Reset timers and cached percentage after emitting
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100), if the total is known
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.items_processed as f64 / total as f64) * 100.0)
    }

    /// Remaining time at the current rate
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.items_processed);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!("[PROGRESS] Processed {} items", self.items_processed)];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} items/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Logs progress through `tracing`
#[derive(Debug, Default)]
pub struct TracingProgress {
    state: Option<ProgressState>,
    update_interval: Option<Duration>,
}

impl TracingProgress {
    /// Sink with the default cadence
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the time-based update interval
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    /// Current state, once a job started
    pub fn state(&self) -> Option<&ProgressState> {
        self.state.as_ref()
    }
}

impl ProgressSink for TracingProgress {
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::JobStarted {
                checkpoint_id,
                operation_type,
                total_items,
                cursor,
                batch_size,
            } => {
                let mut state = ProgressState::new(*total_items, *cursor);
                if let Some(interval) = self.update_interval {
                    state.update_interval = interval;
                }
                self.state = Some(state);
                info!(
                    checkpoint_id = checkpoint_id.as_str(),
                    operation = %operation_type,
                    total_items = ?total_items,
                    cursor,
                    batch_size,
                    "Job started"
                );
            }
            ProgressEvent::Throttled {
                item,
                attempt,
                wait,
            } => {
                warn!(
                    item = item.as_str(),
                    attempt,
                    wait_secs = wait.as_secs_f64(),
                    "Throttled by remote API, backing off"
                );
            }
            ProgressEvent::BatchCheckpointed { cursor, .. } => {
                if let Some(state) = self.state.as_mut() {
                    state.update(*cursor);
                    if state.should_emit_update() {
                        info!("{}", state.format_progress());
                        state.mark_emitted();
                    }
                }
            }
            ProgressEvent::JobFinished {
                status,
                cursor,
                counters,
                elapsed,
            } => {
                info!(
                    status = %status,
                    cursor,
                    processed = counters.processed,
                    succeeded = counters.succeeded,
                    skipped = counters.skipped,
                    errored = counters.errored,
                    not_found = counters.not_found,
                    multiple_matches = counters.multiple_matches,
                    elapsed = %format_duration(*elapsed),
                    "Job finished"
                );
            }
            ProgressEvent::BatchStarted { .. } | ProgressEvent::ItemProcessed { .. } => {}
        }
    }
}

/// Compact duration for progress lines ("42s", "7m", "1.5h")
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
