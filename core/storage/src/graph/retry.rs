//! Retry policy with exponential backoff, Retry-After handling and an
//! explicit per-request state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use drivelink_common::RETRYABLE_STATUSES;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added on top of the backoff.
    pub jitter: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter bound. `Duration::ZERO` disables jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the backoff delay after the given (0-based) attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter.is_zero() {
            0.0
        } else {
            rand::random::<f64>() * self.jitter.as_millis() as f64
        };

        Duration::from_millis((capped_delay + jitter) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Parse a `Retry-After` header value: delta seconds or an HTTP date.
///
/// Negative values and dates in the past clamp to zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds.max(0.0)).ok();
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// What one attempt produced, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx response.
    Success,
    /// 401 on an authenticated request.
    Unauthorized,
    /// Any other HTTP status.
    Status(u16),
    /// Connect/read/timeout failure.
    Transport,
}

impl Outcome {
    /// Classify an HTTP status.
    pub fn from_status(status: u16, authenticated: bool) -> Self {
        match status {
            200..=299 => Self::Success,
            401 if authenticated => Self::Unauthorized,
            other => Self::Status(other),
        }
    }
}

/// Lifecycle of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    /// About to issue the given (0-based) attempt.
    Attempting { attempt: u32 },
    /// Waiting `delay` before issuing `attempt`; the credential must be
    /// refreshed first when `refresh_credential` is set.
    Retrying {
        attempt: u32,
        delay: Duration,
        refresh_credential: bool,
    },
    /// The last attempt succeeded.
    Succeeded,
    /// The last attempt failed in a way retrying cannot fix.
    Rejected,
    /// Every allowed attempt was used up.
    Exhausted,
}

/// Drives [`RetryState`] transitions for a single request.
#[derive(Debug)]
pub struct RetryMachine<'a> {
    config: &'a RetryConfig,
    max_retries: u32,
    backoff_retry: bool,
    refreshed: bool,
    state: RetryState,
}

impl<'a> RetryMachine<'a> {
    /// Start a machine allowing `max_retries + 1` attempts; delays come from `config`.
    pub fn new(config: &'a RetryConfig, max_retries: u32) -> Self {
        Self {
            config,
            max_retries,
            backoff_retry: true,
            refreshed: false,
            state: RetryState::Attempting { attempt: 0 },
        }
    }

    /// Give up on throttling, server and transport failures instead of
    /// backing off. The one-time credential refresh after a 401 still applies.
    pub fn without_backoff_retry(mut self) -> Self {
        self.backoff_retry = false;
        self
    }

    /// Total attempts this machine allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// The attempt currently in flight (or about to be).
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt } | RetryState::Retrying { attempt, .. } => attempt,
            _ => self.max_retries,
        }
    }

    /// Record the outcome of the current attempt and move to the next state.
    pub fn advance(&mut self, outcome: Outcome, retry_after: Option<Duration>) -> &RetryState {
        let attempt = self.attempt();
        let has_next = attempt + 1 < self.max_attempts();
        let may_back_off = has_next && self.backoff_retry;

        self.state = match outcome {
            Outcome::Success => RetryState::Succeeded,
            Outcome::Unauthorized if !self.refreshed => {
                if has_next {
                    self.refreshed = true;
                    RetryState::Retrying {
                        attempt: attempt + 1,
                        delay: Duration::ZERO,
                        refresh_credential: true,
                    }
                } else {
                    RetryState::Exhausted
                }
            }
            Outcome::Unauthorized => RetryState::Rejected,
            Outcome::Status(status) if RETRYABLE_STATUSES.contains(&status) => {
                if may_back_off {
                    RetryState::Retrying {
                        attempt: attempt + 1,
                        delay: retry_after
                            .unwrap_or_else(|| self.config.delay_for_attempt(attempt)),
                        refresh_credential: false,
                    }
                } else {
                    RetryState::Exhausted
                }
            }
            Outcome::Status(_) => RetryState::Rejected,
            Outcome::Transport => {
                if may_back_off {
                    RetryState::Retrying {
                        attempt: attempt + 1,
                        delay: self.config.delay_for_attempt(attempt),
                        refresh_credential: false,
                    }
                } else {
                    RetryState::Exhausted
                }
            }
        };

        &self.state
    }

    /// Mark the pending retry as issued.
    pub fn begin_attempt(&mut self) {
        if let RetryState::Retrying { attempt, .. } = self.state {
            self.state = RetryState::Attempting { attempt };
        }
    }
}
