//! Runtime settings consumed by the acquisition core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::http::{
    Backoff, CONNECT_TIMEOUT_SECS, DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_WAIT,
    REQUEST_TIMEOUT_SECS, RetryPolicy,
};
use crate::limiter::{DEFAULT_CONCURRENCY, MIN_CONCURRENCY};
use crate::remote::DEFAULT_LEVEL;

/// Default credential endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.toubiec.cn/api/get-token.php";

/// Default metadata endpoint.
pub const DEFAULT_METADATA_URL: &str = "https://api.toubiec.cn/api/music_v1.php";

/// Referer the default endpoints expect.
pub const DEFAULT_REFERER: &str = "https://api.toubiec.cn/wyapi.html";

/// Upper bound for timeouts, in seconds.
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Upper bound for backoff and jitter, in milliseconds.
const MAX_DELAY_MS: u128 = 600_000;

/// Errors from settings validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// A numeric setting is outside its accepted range.
    #[error("invalid value for `{field}`: {value} (expected {expected})")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Accepted range, rendered.
        expected: &'static str,
    },

    /// A text setting is empty or malformed.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Setting name.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },
}

/// Everything the core needs to run a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Maximum items in flight (at least 1).
    pub max_concurrency: usize,
    /// Attempt ceiling per HTTP call, including the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_backoff: Duration,
    /// Grow the delay exponentially instead of keeping it constant.
    pub exponential_backoff: bool,
    /// Upper bound of random jitter added to each delay.
    pub jitter: Duration,
    /// Longest wait a server `Retry-After` hint may impose.
    pub max_retry_wait: Duration,
    /// Credential endpoint URL.
    pub token_url: String,
    /// Metadata endpoint URL.
    pub metadata_url: String,
    /// Referer header sent with every request.
    pub referer: Option<String>,
    /// Audio quality level requested.
    pub level: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Where songs are written.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_BACKOFF,
            exponential_backoff: false,
            jitter: Duration::ZERO,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            referer: Some(DEFAULT_REFERER.to_string()),
            level: DEFAULT_LEVEL.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            output_dir: PathBuf::from("music"),
        }
    }
}

impl Settings {
    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`SettingsError`] found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_concurrency < MIN_CONCURRENCY {
            return Err(SettingsError::OutOfRange {
                field: "max_concurrency",
                value: self.max_concurrency.to_string(),
                expected: ">= 1",
            });
        }
        validate_delay("retry_backoff", self.retry_backoff)?;
        validate_delay("jitter", self.jitter)?;
        validate_timeout("max_retry_wait", self.max_retry_wait)?;
        validate_timeout("connect_timeout", self.connect_timeout)?;
        validate_timeout("request_timeout", self.request_timeout)?;
        validate_url("token_url", &self.token_url)?;
        validate_url("metadata_url", &self.metadata_url)?;

        if self.level.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "level",
                reason: "must not be empty".to_string(),
            });
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(SettingsError::Invalid {
                field: "output_dir",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Retry policy described by these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.exponential_backoff {
            Backoff::exponential(self.retry_backoff)
        } else {
            Backoff::Constant(self.retry_backoff)
        };
        RetryPolicy::new(self.max_retries, backoff)
            .with_jitter(self.jitter)
            .with_max_retry_wait(self.max_retry_wait)
    }
}

fn validate_delay(field: &'static str, value: Duration) -> Result<(), SettingsError> {
    if value.as_millis() > MAX_DELAY_MS {
        return Err(SettingsError::OutOfRange {
            field,
            value: format!("{}ms", value.as_millis()),
            expected: "0..=600000ms",
        });
    }
    Ok(())
}

fn validate_timeout(field: &'static str, value: Duration) -> Result<(), SettingsError> {
    if value.is_zero() || value.as_secs() > MAX_TIMEOUT_SECS {
        return Err(SettingsError::OutOfRange {
            field,
            value: format!("{}s", value.as_secs_f64()),
            expected: "1..=3600s",
        });
    }
    Ok(())
}

fn validate_url(field: &'static str, value: &str) -> Result<(), SettingsError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(SettingsError::Invalid {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => Err(SettingsError::Invalid {
            field,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.max_concurrency, 5);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_backoff, Duration::from_secs(1));
        assert_eq!(settings.level, "hires");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let settings = Settings {
            max_concurrency: 0,
            ..Settings::default()
        };
        let error = settings.validate().unwrap_err();
        assert!(matches!(
            error,
            SettingsError::OutOfRange {
                field: "max_concurrency",
                ..
            }
        ));
    }

    #[test]
    fn test_large_concurrency_accepted() {
        let settings = Settings {
            max_concurrency: 150,
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_carries_wait_cap_and_long_base() {
        let settings = Settings {
            retry_backoff: Duration::from_secs(120),
            exponential_backoff: true,
            max_retry_wait: Duration::from_secs(15),
            ..Settings::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_retry_wait(), Duration::from_secs(15));
        assert!(matches!(
            policy.backoff(),
            Backoff::Exponential { max, .. } if *max == Duration::from_secs(120)
        ));
    }

    #[test]
    fn test_zero_retry_wait_rejected() {
        let settings = Settings {
            max_retry_wait: Duration::ZERO,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_retries_and_backoff_are_valid() {
        let settings = Settings {
            max_retries: 0,
            retry_backoff: Duration::ZERO,
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retry_policy().max_attempts(), 1);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let settings = Settings {
            token_url: "ftp://example.com/token".into(),
            ..Settings::default()
        };
        let error = settings.validate().unwrap_err();
        assert!(error.to_string().contains("token_url"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let settings = Settings {
            request_timeout: Duration::ZERO,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_policy_reflects_backoff_mode() {
        let settings = Settings {
            exponential_backoff: true,
            retry_backoff: Duration::from_millis(200),
            ..Settings::default()
        };
        assert_eq!(
            settings.retry_policy().backoff(),
            &Backoff::exponential(Duration::from_millis(200))
        );
    }
}
