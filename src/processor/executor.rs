//! Batch execution loop

use super::config::ProcessorConfig;
use super::job::{BatchJob, JobResult, JobStatus};
use super::operation::{Applied, ItemOperation, OperationError, OutcomeKind};
use super::progress::{ProgressEvent, ProgressSink, TracingProgress};
use super::rate_limit::{ApiResponse, RateController, RateLimitConfig};
use super::ProcessError;
use crate::checkpoint::{Checkpoint, CheckpointDelta, CheckpointStore};
use crate::input::InputError;
use crate::metrics::JobMetrics;
use crate::shutdown::{self, SharedShutdown};
use std::iter::Peekable;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Why an item could not be counted
enum ItemFailure {
    /// Shutdown requested while backing off
    Interrupted,
    /// The run must stop
    Fatal(ProcessError),
}

/// Walks an input sequence in batches, checkpointing after each one
pub struct BatchProcessor<'s> {
    store: &'s CheckpointStore,
    rate: RateController,
    config: ProcessorConfig,
    shutdown: Option<SharedShutdown>,
    progress: Box<dyn ProgressSink>,
    status: JobStatus,
    next_pause: Duration,
}

impl<'s> BatchProcessor<'s> {
    /// Create a processor writing to `store`, paced by `rate_config`
    pub fn new(store: &'s CheckpointStore, rate_config: RateLimitConfig) -> Self {
        Self {
            store,
            rate: RateController::new(rate_config),
            config: ProcessorConfig::default(),
            shutdown: shutdown::get_global_shutdown(),
            progress: Box::new(TracingProgress::new()),
            status: JobStatus::Idle,
            next_pause: Duration::ZERO,
        }
    }

    /// Override batch sizing
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a shared shutdown handle for cooperative interruption
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Replace the progress sink
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Box::new(sink);
        self
    }

    /// Store the processor writes to
    pub fn store(&self) -> &'s CheckpointStore {
        self.store
    }

    /// Current state
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Rate controller of the current job
    pub fn rate_controller(&self) -> &RateController {
        &self.rate
    }

    /// Start a fresh run of `job` over `input`
    pub async fn run<I, O>(
        &mut self,
        job: &BatchJob,
        input: I,
        operation: &O,
    ) -> Result<JobResult, ProcessError>
    where
        I: IntoIterator<Item = Result<String, InputError>>,
        O: ItemOperation + ?Sized,
    {
        self.ensure_not_running()?;
        job.validate().map_err(ProcessError::Validation)?;
        if job.operation_type != operation.operation_type() {
            return Err(ProcessError::Validation(format!(
                "job is for '{}' but the operation performs '{}'",
                job.operation_type,
                operation.operation_type()
            )));
        }

        let batch_size = self.config.initial_batch_size(job.total_items);
        let checkpoint = self.store.create(job, batch_size)?;
        self.continue_from(checkpoint, input.into_iter(), operation)
            .await
    }

    /// Continue `checkpoint` with `input` already positioned at its cursor
    pub(crate) async fn continue_from<I, O>(
        &mut self,
        checkpoint: Checkpoint,
        input: I,
        operation: &O,
    ) -> Result<JobResult, ProcessError>
    where
        I: Iterator<Item = Result<String, InputError>>,
        O: ItemOperation + ?Sized,
    {
        self.ensure_not_running()?;
        let span = tracing::info_span!(
            "batch_job",
            checkpoint_id = %checkpoint.id(),
            operation = %checkpoint.operation_type(),
            environment = %checkpoint.environment(),
        );
        self.drive(checkpoint, input.peekable(), operation)
            .instrument(span)
            .await
    }

    async fn drive<I, O>(
        &mut self,
        mut checkpoint: Checkpoint,
        mut input: Peekable<I>,
        operation: &O,
    ) -> Result<JobResult, ProcessError>
    where
        I: Iterator<Item = Result<String, InputError>>,
        O: ItemOperation + ?Sized,
    {
        let started = Instant::now();
        let metrics = JobMetrics::start(
            checkpoint.operation_type().as_str(),
            checkpoint.environment(),
        );
        let ceiling = self
            .config
            .batch_size
            .unwrap_or_else(|| super::batch_size_for(checkpoint.total_items()));
        let mut batch_size = checkpoint.batch_size().clamp(1, ceiling.max(1));
        let mut batches = 0u64;

        self.status = JobStatus::Running;
        self.next_pause = Duration::ZERO;
        self.emit(ProgressEvent::JobStarted {
            checkpoint_id: checkpoint.id().to_string(),
            operation_type: checkpoint.operation_type(),
            total_items: checkpoint.total_items(),
            cursor: checkpoint.cursor(),
            batch_size,
        });

        loop {
            if input.peek().is_none() {
                return self.complete(&checkpoint, batches, started, &metrics);
            }

            // Nothing past the declared total reaches the operation
            if checkpoint.is_exhausted() {
                let cause = ProcessError::Validation(format!(
                    "input has more items than the declared total of {}",
                    checkpoint.cursor()
                ));
                return Err(self.fail(&checkpoint, cause, started, &metrics));
            }

            if self.shutdown_requested() {
                info!(cursor = checkpoint.cursor(), "Shutdown requested at batch boundary");
                return Ok(self.interrupt(&checkpoint, batches, started, &metrics));
            }

            let limit = checkpoint
                .remaining_items()
                .map_or(batch_size, |r| batch_size.min(r as usize));
            let mut batch = Vec::with_capacity(limit);
            while batch.len() < limit {
                match input.next() {
                    Some(Ok(item)) => batch.push(item),
                    Some(Err(e)) => {
                        return Err(self.fail(&checkpoint, e.into(), started, &metrics));
                    }
                    None => break,
                }
            }

            batches += 1;
            let start_cursor = checkpoint.cursor();
            debug!(batch = batches, start_cursor, size = batch.len(), "Processing batch");
            self.emit(ProgressEvent::BatchStarted {
                batch: batches,
                start_cursor,
            });

            let mut delta = CheckpointDelta::default();
            for (offset, item) in batch.iter().enumerate() {
                if !self.next_pause.is_zero() && !self.backoff(self.next_pause).await {
                    info!(
                        cursor = start_cursor + offset as u64,
                        "Shutdown requested while pacing; batch left partially recorded"
                    );
                    return self.interrupt_partial(checkpoint, &delta, batches, started, &metrics);
                }

                match self.apply_with_retry(item, operation, &metrics).await {
                    Ok(applied) => {
                        delta.record(applied.outcome);
                        delta.add_sub_counts(&applied.sub_counts);
                        metrics.record_item(applied.outcome.as_str());
                        self.emit(ProgressEvent::ItemProcessed {
                            index: start_cursor + offset as u64,
                            item: item.clone(),
                            outcome: applied.outcome,
                        });
                    }
                    Err(ItemFailure::Interrupted) => {
                        info!(
                            cursor = start_cursor + offset as u64,
                            "Shutdown requested during backoff; batch left partially recorded"
                        );
                        return self.interrupt_partial(checkpoint, &delta, batches, started, &metrics);
                    }
                    Err(ItemFailure::Fatal(err)) => {
                        return Err(self.fail(&checkpoint, err, started, &metrics));
                    }
                }
            }

            if self.config.adaptive_batch_size {
                let next = self.rate.next_batch_size(batch_size, ceiling);
                if next != batch_size {
                    debug!(from = batch_size, to = next, "Adjusting batch size");
                    delta.batch_size = Some(next);
                    batch_size = next;
                }
            }

            checkpoint = match self.write_delta(&checkpoint, &delta, &metrics) {
                Ok(updated) => updated,
                Err(e) => return Err(self.fail(&checkpoint, e, started, &metrics)),
            };
            self.emit(ProgressEvent::BatchCheckpointed {
                batch: batches,
                cursor: checkpoint.cursor(),
                counters: *checkpoint.counters(),
            });
        }
    }

    /// Apply `operation` to one item, retrying throttled and transient failures
    async fn apply_with_retry<O>(
        &mut self,
        item: &str,
        operation: &O,
        metrics: &JobMetrics,
    ) -> Result<Applied, ItemFailure>
    where
        O: ItemOperation + ?Sized,
    {
        self.rate.reset_item();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation.apply(item).await {
                Ok(applied) => {
                    self.next_pause = self.rate.on_success(applied.headroom);
                    return Ok(applied);
                }
                Err(OperationError::Throttled { retry_after }) => {
                    match self.rate.next_delay(&ApiResponse::Throttled { retry_after }) {
                        Ok(wait) => {
                            metrics.record_throttle(attempt, wait);
                            self.emit(ProgressEvent::Throttled {
                                item: item.to_string(),
                                attempt,
                                wait,
                            });
                            if !self.backoff(wait).await {
                                return Err(ItemFailure::Interrupted);
                            }
                        }
                        Err(exhausted) => {
                            error!(item, attempt, "Throttling persisted past the retry budget");
                            return Err(ItemFailure::Fatal(exhausted.into()));
                        }
                    }
                }
                Err(OperationError::Transient(reason)) => {
                    match self.rate.next_delay(&ApiResponse::TransientFailure) {
                        Ok(wait) => {
                            warn!(item, attempt, %reason, "Transient failure, retrying");
                            if !self.backoff(wait).await {
                                return Err(ItemFailure::Interrupted);
                            }
                        }
                        Err(exhausted) => {
                            warn!(item, attempt, %reason, error = %exhausted, "Giving up on item");
                            self.next_pause = self.rate.pacing_delay();
                            return Ok(Applied::from(OutcomeKind::Error));
                        }
                    }
                }
                Err(OperationError::Validation(reason)) => {
                    warn!(item, %reason, "Invalid item");
                    self.next_pause = self.rate.pacing_delay();
                    return Ok(Applied::from(OutcomeKind::Error));
                }
                Err(fatal) => {
                    error!(item, error = %fatal, "Fatal operation error");
                    return Err(ItemFailure::Fatal(ProcessError::Fatal(fatal.to_string())));
                }
            }
        }
    }

    /// Sleep for `wait` unless shutdown is requested first; `false` means interrupted
    async fn backoff(&self, wait: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_shutdown_requested() {
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(wait) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(wait).await;
                true
            }
        }
    }

    fn write_delta(
        &mut self,
        checkpoint: &Checkpoint,
        delta: &CheckpointDelta,
        metrics: &JobMetrics,
    ) -> Result<Checkpoint, ProcessError> {
        let write_start = Instant::now();
        let updated = self.store.update(checkpoint.id(), delta)?;
        metrics.record_checkpoint(updated.cursor(), write_start.elapsed());
        debug!(
            cursor = updated.cursor(),
            processed = updated.counters().processed,
            "Batch checkpointed"
        );
        Ok(updated)
    }

    fn complete(
        &mut self,
        checkpoint: &Checkpoint,
        batches: u64,
        started: Instant,
        metrics: &JobMetrics,
    ) -> Result<JobResult, ProcessError> {
        let completed = match self.store.mark_completed(checkpoint.id()) {
            Ok(completed) => completed,
            Err(e) => return Err(self.fail(checkpoint, e.into(), started, metrics)),
        };
        self.status = JobStatus::Completed;
        metrics.record_completed(completed.counters().processed);
        Ok(self.finish(&completed, batches, started))
    }

    fn interrupt(
        &mut self,
        checkpoint: &Checkpoint,
        batches: u64,
        started: Instant,
        metrics: &JobMetrics,
    ) -> JobResult {
        self.status = JobStatus::Interrupted;
        metrics.record_interrupted(checkpoint.cursor());
        info!(
            checkpoint_id = checkpoint.id(),
            cursor = checkpoint.cursor(),
            "Job interrupted; resume with this checkpoint id"
        );
        self.finish(checkpoint, batches, started)
    }

    /// Record the items of an unfinished batch that were fully handled, then stop
    fn interrupt_partial(
        &mut self,
        checkpoint: Checkpoint,
        delta: &CheckpointDelta,
        batches: u64,
        started: Instant,
        metrics: &JobMetrics,
    ) -> Result<JobResult, ProcessError> {
        let checkpoint = if delta.items() > 0 {
            match self.write_delta(&checkpoint, delta, metrics) {
                Ok(updated) => updated,
                Err(e) => return Err(self.fail(&checkpoint, e, started, metrics)),
            }
        } else {
            checkpoint
        };
        Ok(self.interrupt(&checkpoint, batches, started, metrics))
    }

    fn fail(
        &mut self,
        checkpoint: &Checkpoint,
        cause: ProcessError,
        started: Instant,
        metrics: &JobMetrics,
    ) -> ProcessError {
        self.status = JobStatus::Failed;
        let message = cause.to_string();
        if let Err(e) = self.store.mark_failed(checkpoint.id(), &message) {
            error!(
                checkpoint_id = checkpoint.id(),
                error = %e,
                "Could not mark checkpoint failed"
            );
        }
        metrics.record_failed(&message);
        self.emit(ProgressEvent::JobFinished {
            status: JobStatus::Failed,
            cursor: checkpoint.cursor(),
            counters: *checkpoint.counters(),
            elapsed: started.elapsed(),
        });
        error!(
            checkpoint_id = checkpoint.id(),
            last_cursor = checkpoint.cursor(),
            error = %message,
            "Job failed; resume id retained"
        );
        ProcessError::JobFailed {
            checkpoint_id: checkpoint.id().to_string(),
            last_cursor: checkpoint.cursor(),
            source: Box::new(cause),
        }
    }

    fn finish(&mut self, checkpoint: &Checkpoint, batches: u64, started: Instant) -> JobResult {
        let elapsed = started.elapsed();
        self.emit(ProgressEvent::JobFinished {
            status: self.status,
            cursor: checkpoint.cursor(),
            counters: *checkpoint.counters(),
            elapsed,
        });
        JobResult::from_checkpoint(checkpoint, self.status, batches, elapsed)
    }

    fn ensure_not_running(&self) -> Result<(), ProcessError> {
        if self.status == JobStatus::Running {
            return Err(ProcessError::InvalidStateTransition(
                "processor is already running a job".to_string(),
            ));
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    fn emit(&mut self, event: ProgressEvent) {
        self.progress.on_event(&event);
    }
}
