//! Adaptive request pacing with throttling backoff
//!
//! A [`RateController`] is created per job and owns all pacing state for it.
//! It only computes delays; the processor does the sleeping.

use super::config::{
    CAUTIOUS_REQUEST_DELAY_MS, DEFAULT_REQUEST_DELAY_MS, INITIAL_BACKOFF_MS, MAX_ATTEMPTS,
    MAX_BACKOFF_MS, MIN_BATCH_SIZE, MIN_REQUEST_DELAY_MS,
};
use super::operation::RateHeadroom;
use std::time::Duration;
use tracing::{debug, warn};

/// Pacing and backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Delay with plenty of headroom
    pub min_delay: Duration,
    /// Delay with moderate headroom or no headroom information
    pub default_delay: Duration,
    /// Delay with low headroom
    pub cautious_delay: Duration,
    /// First backoff after a throttling response
    pub initial_backoff: Duration,
    /// Backoff multiplier per consecutive failure
    pub backoff_factor: u32,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Attempts per item before giving up
    pub max_attempts: u32,
    /// Above this headroom ratio the minimum delay applies
    pub high_headroom: f64,
    /// Below this headroom ratio the cautious delay applies
    pub low_headroom: f64,
    /// Below this headroom ratio wait for the window reset
    pub critical_headroom: f64,
    /// Extra wait after the reported reset time
    pub reset_grace: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(MIN_REQUEST_DELAY_MS),
            default_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            cautious_delay: Duration::from_millis(CAUTIOUS_REQUEST_DELAY_MS),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            backoff_factor: 2,
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            max_attempts: MAX_ATTEMPTS,
            high_headroom: 0.70,
            low_headroom: 0.20,
            critical_headroom: 0.10,
            reset_grace: Duration::from_millis(500),
        }
    }
}

impl RateLimitConfig {
    /// No waits at all; retry budget unchanged. For tests and dry runs.
    pub fn unpaced() -> Self {
        Self {
            min_delay: Duration::ZERO,
            default_delay: Duration::ZERO,
            cautious_delay: Duration::ZERO,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            reset_grace: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Override the default inter-request delay, keeping min <= default <= cautious
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self.min_delay = self.min_delay.min(delay);
        self.cautious_delay = self.cautious_delay.max(delay);
        self
    }

    /// Override the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override the backoff curve
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Backoff before retry number `retry` (0-based), capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What the last request to the remote API reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiResponse {
    /// Request accepted
    Success {
        /// Headroom reported with the response
        headroom: Option<RateHeadroom>,
    },
    /// Request throttled
    Throttled {
        /// Server-provided wait
        retry_after: Option<Duration>,
    },
    /// Request failed transiently
    TransientFailure,
}

/// Retry budget exhausted for one item
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Throttled on every attempt
    #[error("rate limit exceeded after {attempts} attempts")]
    ThrottleBudgetExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Transient failure on every attempt
    #[error("transient failures persisted after {attempts} attempts")]
    TransientBudgetExhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Per-job pacing state
#[derive(Debug, Clone)]
pub struct RateController {
    config: RateLimitConfig,
    current_delay: Duration,
    consecutive_throttles: u32,
    consecutive_transient: u32,
    throttled_in_batch: bool,
    last_headroom: Option<RateHeadroom>,
}

impl RateController {
    /// Create a controller
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            current_delay: config.default_delay,
            config,
            consecutive_throttles: 0,
            consecutive_transient: 0,
            throttled_in_batch: false,
            last_headroom: None,
        }
    }

    /// Settings in use
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Current base inter-request delay
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Throttling responses since the last success
    pub fn consecutive_throttles(&self) -> u32 {
        self.consecutive_throttles
    }

    /// Wait before the next request, given the response to the previous one.
    ///
    /// On success this is the pacing delay. On throttling or transient
    /// failure it is the backoff before retrying the same item, or an error
    /// once the attempt budget is spent.
    pub fn next_delay(&mut self, response: &ApiResponse) -> Result<Duration, RateLimitError> {
        match response {
            ApiResponse::Success { headroom } => Ok(self.on_success(*headroom)),
            ApiResponse::Throttled { retry_after } => {
                self.consecutive_throttles += 1;
                self.throttled_in_batch = true;
                let attempts = self.consecutive_throttles;
                if attempts >= self.config.max_attempts {
                    warn!(attempts, "Throttling persisted, giving up on item");
                    return Err(RateLimitError::ThrottleBudgetExhausted { attempts });
                }
                self.current_delay = self.current_delay.max(self.config.cautious_delay);
                let backoff = self.config.backoff(attempts - 1);
                let wait = retry_after.map_or(backoff, |server| {
                    server.min(self.config.max_backoff).max(backoff)
                });
                debug!(attempts, wait_ms = wait.as_millis() as u64, "Backing off after throttling");
                Ok(wait)
            }
            ApiResponse::TransientFailure => {
                self.consecutive_transient += 1;
                let attempts = self.consecutive_transient;
                if attempts >= self.config.max_attempts {
                    return Err(RateLimitError::TransientBudgetExhausted { attempts });
                }
                Ok(self.config.backoff(attempts - 1))
            }
        }
    }

    /// Record a successful request and return the pacing delay before the next one
    pub fn on_success(&mut self, headroom: Option<RateHeadroom>) -> Duration {
        self.consecutive_throttles = 0;
        self.consecutive_transient = 0;
        if headroom.is_some() {
            self.last_headroom = headroom;
        }
        let target = self.headroom_delay();
        // Relax an escalated delay halfway back per success
        self.current_delay = if self.current_delay > target {
            (self.current_delay / 2).max(target)
        } else {
            target
        };
        self.pacing_delay()
    }

    /// Reset per-item retry counters before a new item
    pub fn reset_item(&mut self) {
        self.consecutive_throttles = 0;
        self.consecutive_transient = 0;
    }

    /// Delay to observe between two items
    pub fn pacing_delay(&self) -> Duration {
        let base = self.current_delay.max(self.config.min_delay);
        match self.last_headroom {
            Some(headroom) if headroom.ratio() < self.config.critical_headroom => {
                base.max(self.reset_wait(&headroom))
            }
            _ => base,
        }
    }

    /// Batch size to use after a batch of `current` items, never above `ceiling`.
    ///
    /// Halves after a batch that saw throttling, doubles back after a clean one.
    pub fn next_batch_size(&mut self, current: usize, ceiling: usize) -> usize {
        let throttled = std::mem::take(&mut self.throttled_in_batch);
        let next = if throttled {
            (current / 2).max(MIN_BATCH_SIZE).min(current)
        } else {
            current.saturating_mul(2).min(ceiling).max(current.min(ceiling))
        };
        next.max(1)
    }

    fn headroom_delay(&self) -> Duration {
        match self.last_headroom {
            None => self.config.default_delay,
            Some(headroom) => {
                let ratio = headroom.ratio();
                if ratio > self.config.high_headroom {
                    self.config.min_delay
                } else if ratio >= self.config.low_headroom {
                    self.config.default_delay
                } else {
                    self.config.cautious_delay
                }
            }
        }
    }

    fn reset_wait(&self, headroom: &RateHeadroom) -> Duration {
        let Some(reset_at) = headroom.reset_at else {
            return self.config.cautious_delay;
        };
        let now = chrono::Utc::now().timestamp();
        let secs = u64::try_from(reset_at.saturating_sub(now)).unwrap_or(0);
        (Duration::from_secs(secs) + self.config.reset_grace).min(self.config.max_backoff)
    }
}
