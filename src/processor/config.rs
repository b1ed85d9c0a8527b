//! Pacing, backoff and batch sizing constants

use std::time::Duration;

/// Minimum delay between two requests in milliseconds.
/// Applied when the API reports plenty of rate-limit headroom.
pub const MIN_REQUEST_DELAY_MS: u64 = 400;

/// Default delay between two requests in milliseconds.
/// Keeps a single job at two requests per second, below the management API's
/// sustained limit.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;

/// Delay used when headroom runs low, in milliseconds.
pub const CAUTIOUS_REQUEST_DELAY_MS: u64 = 1000;

/// Initial backoff delay after a throttling response, in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000; // 60 seconds

/// Attempts per item (first try included) before throttling becomes fatal.
pub const MAX_ATTEMPTS: u32 = 3;

/// Smallest batch size the adaptive sizing shrinks to.
pub const MIN_BATCH_SIZE: usize = 5;

/// Fixed per-batch cost (checkpoint write, logging) used by estimates.
pub const BATCH_OVERHEAD: Duration = Duration::from_secs(2);

/// Datasets below this many items are "small".
pub const SMALL_DATASET_THRESHOLD: u64 = 500;

/// Datasets at or above this many items are "large".
pub const LARGE_DATASET_THRESHOLD: u64 = 1000;

/// Batch size for small datasets
pub const SMALL_DATASET_BATCH_SIZE: usize = 100;

/// Batch size for medium datasets
pub const MEDIUM_DATASET_BATCH_SIZE: usize = 50;

/// Batch size for large datasets, and for inputs of unknown length
pub const LARGE_DATASET_BATCH_SIZE: usize = 25;

/// Batch size for a dataset of `total_items` items.
///
/// Larger datasets never get larger batches than smaller ones. An unknown
/// total is treated as a large dataset.
pub fn batch_size_for(total_items: Option<u64>) -> usize {
    match total_items {
        Some(total) if total < SMALL_DATASET_THRESHOLD => SMALL_DATASET_BATCH_SIZE,
        Some(total) if total < LARGE_DATASET_THRESHOLD => MEDIUM_DATASET_BATCH_SIZE,
        _ => LARGE_DATASET_BATCH_SIZE,
    }
}

/// Rough wall-clock estimate for a job: one delay per item plus a fixed
/// overhead per batch. For display only.
pub fn estimated_duration(total_items: u64, batch_size: usize, per_request_delay: Duration) -> Duration {
    let batch_size = batch_size.max(1) as u64;
    let batches = total_items.div_ceil(batch_size);
    let items = u32::try_from(total_items).unwrap_or(u32::MAX);
    let batches = u32::try_from(batches).unwrap_or(u32::MAX);
    per_request_delay.saturating_mul(items) + BATCH_OVERHEAD.saturating_mul(batches)
}

/// Batch processor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Fixed batch size; `None` derives it from the input size
    pub batch_size: Option<usize>,
    /// Shrink batches after throttling and grow them back after clean batches
    pub adaptive_batch_size: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            adaptive_batch_size: true,
        }
    }
}

impl ProcessorConfig {
    /// Use a fixed batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    /// Enable or disable adaptive batch sizing
    pub fn with_adaptive_batch_size(mut self, adaptive: bool) -> Self {
        self.adaptive_batch_size = adaptive;
        self
    }

    /// Initial batch size for a job of `total_items` items
    pub fn initial_batch_size(&self, total_items: Option<u64>) -> usize {
        self.batch_size.unwrap_or_else(|| batch_size_for(total_items))
    }
}
