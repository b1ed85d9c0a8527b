//! Job metrics
//!
//! Recorded through the `metrics` facade, so they are free when no recorder
//! is installed. [`init_metrics`] installs the Prometheus exporter with a
//! scrape endpoint for long-running sweeps.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static METRICS_INITIALIZED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: later calls are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.load(Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "items_processed_total",
        Unit::Count,
        "Input items processed, by operation and outcome"
    );
    describe_counter!(
        "throttle_responses_total",
        Unit::Count,
        "Throttling responses received from the directory API"
    );
    describe_histogram!(
        "backoff_duration_seconds",
        Unit::Seconds,
        "Backoff waits after throttling or transient failures"
    );
    describe_counter!(
        "checkpoint_writes_total",
        Unit::Count,
        "Checkpoint records written after a batch"
    );
    describe_histogram!(
        "checkpoint_write_duration_seconds",
        Unit::Seconds,
        "Time spent writing a checkpoint record"
    );
    describe_gauge!(
        "job_cursor",
        Unit::Count,
        "Durable cursor of the running job"
    );
    describe_counter!(
        "jobs_completed_total",
        Unit::Count,
        "Jobs that processed their whole input"
    );
    describe_counter!(
        "jobs_failed_total",
        Unit::Count,
        "Jobs aborted on a fatal error"
    );
    describe_counter!(
        "jobs_interrupted_total",
        Unit::Count,
        "Jobs stopped on request at a batch boundary"
    );

    METRICS_INITIALIZED.store(true, Ordering::SeqCst);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] succeeded
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Metrics for one job run
pub struct JobMetrics {
    operation: String,
    environment: String,
    start_time: Instant,
}

impl JobMetrics {
    /// Start tracking a run
    pub fn start(operation: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            environment: environment.into(),
            start_time: Instant::now(),
        }
    }

    /// Count one processed item
    pub fn record_item(&self, outcome: &str) {
        counter!(
            "items_processed_total",
            "operation" => self.operation.clone(),
            "outcome" => outcome.to_string(),
        )
        .increment(1);
    }

    /// Record a throttling response and the backoff it caused
    pub fn record_throttle(&self, attempt: u32, backoff: Duration) {
        counter!(
            "throttle_responses_total",
            "operation" => self.operation.clone(),
            "attempt" => attempt.to_string(),
        )
        .increment(1);
        histogram!(
            "backoff_duration_seconds",
            "operation" => self.operation.clone(),
        )
        .record(backoff.as_secs_f64());
    }

    /// Record a checkpoint write
    pub fn record_checkpoint(&self, cursor: u64, write_duration: Duration) {
        counter!(
            "checkpoint_writes_total",
            "operation" => self.operation.clone(),
        )
        .increment(1);
        histogram!("checkpoint_write_duration_seconds").record(write_duration.as_secs_f64());
        gauge!(
            "job_cursor",
            "operation" => self.operation.clone(),
            "environment" => self.environment.clone(),
        )
        .set(cursor as f64);
    }

    /// Record a completed run
    pub fn record_completed(&self, processed: u64) {
        counter!(
            "jobs_completed_total",
            "operation" => self.operation.clone(),
        )
        .increment(1);
        info!(
            operation = %self.operation,
            environment = %self.environment,
            processed,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Job completed"
        );
    }

    /// Record an aborted run
    pub fn record_failed(&self, error: &str) {
        counter!(
            "jobs_failed_total",
            "operation" => self.operation.clone(),
        )
        .increment(1);
        error!(
            operation = %self.operation,
            environment = %self.environment,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Job failed"
        );
    }

    /// Record a run stopped on request
    pub fn record_interrupted(&self, cursor: u64) {
        counter!(
            "jobs_interrupted_total",
            "operation" => self.operation.clone(),
        )
        .increment(1);
        warn!(
            operation = %self.operation,
            environment = %self.environment,
            cursor,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Job interrupted"
        );
    }
}
