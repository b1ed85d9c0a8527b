//! Duration estimate for a planned job

use super::{CliError, OutputFormat};
use crate::processor::config::DEFAULT_REQUEST_DELAY_MS;
use crate::processor::progress::format_duration;
use crate::processor::{batch_size_for, estimated_duration};
use clap::Args;
use serde_json::json;
use std::time::Duration;

/// Estimate arguments
#[derive(Debug, Args)]
pub struct EstimateArgs {
    /// Number of input items
    #[arg(long)]
    pub items: u64,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_DELAY_MS)]
    pub delay_ms: u64,

    /// Batch size; derived from --items when omitted
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,
}

/// Numbers behind an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    /// Items in the job
    pub items: u64,
    /// Batch size used
    pub batch_size: usize,
    /// Number of batches
    pub batches: u64,
    /// Expected wall-clock time
    pub duration: Duration,
}

impl EstimateArgs {
    /// Compute the estimate
    pub fn estimate(&self) -> Estimate {
        let batch_size = self
            .batch_size
            .map(|size| usize::try_from(size).unwrap_or(usize::MAX))
            .unwrap_or_else(|| batch_size_for(Some(self.items)));
        let delay = Duration::from_millis(self.delay_ms);
        Estimate {
            items: self.items,
            batch_size,
            batches: self.items.div_ceil(batch_size as u64),
            duration: estimated_duration(self.items, batch_size, delay),
        }
    }

    /// Print the estimate
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let estimate = self.estimate();
        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "items": estimate.items,
                        "batch_size": estimate.batch_size,
                        "batches": estimate.batches,
                        "delay_ms": self.delay_ms,
                        "estimated_seconds": estimate.duration.as_secs_f64(),
                    }))?
                );
            }
            OutputFormat::Human => {
                println!("Items: {}", estimate.items);
                println!(
                    "Batch size: {} ({} batches)",
                    estimate.batch_size, estimate.batches
                );
                println!("Delay per request: {}ms", self.delay_ms);
                println!("Estimated time: ~{}", format_duration(estimate.duration));
            }
        }
        Ok(())
    }
}
