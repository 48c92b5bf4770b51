//! Retry policy with configurable backoff for transient HTTP failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying request errors and determining retry behavior.
//!
//! # Overview
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - connection failures, timeouts, retryable 5xx
//! - [`FailureType::RateLimited`] - HTTP 429 (retries, honoring `Retry-After`)
//! - [`FailureType::Permanent`] - everything else; retrying would not help
//!
//! The [`RetryPolicy`] then decides whether another attempt is allowed and how
//! long to wait before it.
//!
//! # Example
//!
//! ```
//! use songfetch_core::http::{HttpError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = HttpError::http_status("https://example.com/api", 503);
//!
//! match policy.should_retry(policy.classify(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::HttpError;
use super::constants::MAX_RETRY_AFTER;

/// Default attempt ceiling (including the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts (1 second, constant).
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Default status codes that are worth another attempt.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Default maximum delay cap for exponential backoff (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default longest wait a `Retry-After` header may impose between attempts.
pub const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);

/// Default backoff multiplier for exponential backoff (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Classification of request failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// Failure that won't succeed regardless of retries.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the request.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Delay strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant(Duration),

    /// `min(base * multiplier^(attempt - 1), max)`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Upper bound for any single delay.
        max: Duration,
        /// Growth factor per attempt.
        multiplier: f32,
    },
}

impl Backoff {
    /// Exponential backoff starting at `base`, doubling, capped at 32 seconds
    /// or at `base` when that is larger.
    #[must_use]
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            max: DEFAULT_MAX_DELAY.max(base),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Constant(DEFAULT_BACKOFF)
    }
}

/// Configuration for retry behavior.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff`: constant 1 second
/// - `jitter`: none
/// - `retryable_statuses`: 429, 500, 502, 503, 504
/// - `max_retry_wait`: 60 seconds
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay strategy.
    backoff: Backoff,

    /// Upper bound of random jitter added to each delay.
    jitter: Duration,

    /// HTTP statuses that are retried.
    retryable_statuses: Vec<u16>,

    /// Cap on server-requested waits; an admission slot is held while waiting.
    max_retry_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            jitter: Duration::ZERO,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// `max_attempts` counts the initial attempt; `0` is treated as `1`.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ..Self::default()
        }
    }

    /// Creates a policy with a custom attempt ceiling, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::default())
    }

    /// Adds up to `jitter` of random delay to every backoff.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the set of retryable HTTP statuses.
    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Caps how long a `Retry-After` header may delay the next attempt.
    #[must_use]
    pub fn with_max_retry_wait(mut self, max_retry_wait: Duration) -> Self {
        self.max_retry_wait = max_retry_wait;
        self
    }

    /// Returns the cap applied to `Retry-After` waits.
    #[must_use]
    pub fn max_retry_wait(&self) -> Duration {
        self.max_retry_wait
    }

    /// Combines the policy backoff with a server `Retry-After` hint.
    ///
    /// The server hint wins when longer, but never beyond `max_retry_wait`;
    /// the backoff itself is never shortened.
    #[must_use]
    pub fn retry_delay(&self, backoff: Duration, retry_after: Option<Duration>) -> Duration {
        let Some(server) = retry_after else {
            return backoff;
        };
        if server > self.max_retry_wait {
            warn!(
                retry_after_secs = server.as_secs(),
                max_wait_secs = self.max_retry_wait.as_secs(),
                "Retry-After exceeds configured wait cap, shortening"
            );
        }
        server.min(self.max_retry_wait).max(backoff)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured backoff strategy.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Classifies a request error for retry decisions.
    ///
    /// | Error | Type |
    /// |-------|------|
    /// | 429 (if retryable) | RateLimited |
    /// | status in retryable set | Transient |
    /// | any other status | Permanent |
    /// | Timeout | Transient |
    /// | Network (TLS) | Permanent |
    /// | Network (other) | Transient |
    /// | InvalidUrl | Permanent |
    #[must_use]
    pub fn classify(&self, error: &HttpError) -> FailureType {
        match error {
            HttpError::HttpStatus { status, .. } => {
                if !self.retryable_statuses.contains(status) {
                    FailureType::Permanent
                } else if *status == 429 {
                    FailureType::RateLimited
                } else {
                    FailureType::Transient
                }
            }
            HttpError::Timeout { .. } => FailureType::Transient,
            HttpError::Network { source, .. } => {
                if is_tls_error(source) {
                    FailureType::Permanent
                } else {
                    FailureType::Transient
                }
            }
            HttpError::InvalidUrl { .. } => FailureType::Permanent,
        }
    }

    /// Returns true when `error` is a network-class failure: the remote never
    /// gave a definitive answer, either because the transport broke or because
    /// every attempt hit a retryable status.
    #[must_use]
    pub fn is_network_failure(&self, error: &HttpError) -> bool {
        error.is_transport() || self.classify(error) != FailureType::Permanent
    }

    /// Determines whether to retry a failed request.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay before the attempt following `attempt`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = match &self.backoff {
            Backoff::Constant(delay) => *delay,
            Backoff::Exponential {
                base,
                max,
                multiplier,
            } => {
                let exponent = f64::from(attempt.saturating_sub(1));
                let delay_ms = base.as_millis() as f64 * f64::from(*multiplier).powf(exponent);
                let capped_ms = delay_ms.min(max.as_millis() as f64);
                Duration::from_millis(capped_ms as u64)
            }
        };

        base + self.calculate_jitter()
    }

    /// Random jitter between 0 and the configured bound.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.jitter.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Values above one hour are capped; negative values and dates in the past
/// yield `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, ignoring");
            None
        }
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
