//! Retry logic with exponential backoff for failed segment fetches.
//!
//! A failed fetch is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - failures that won't succeed regardless of retries
//! - [`FailureType::RateLimited`] - server rate limiting (retries with backoff)
//!
//! The [`RetryPolicy`] then decides whether another attempt is made, adding
//! jitter to an exponential delay. Playlist fetches are never retried; the
//! policy only applies to segments, and exhausting it leaves the segment
//! failed without failing the job.
//!
//! # Example
//!
//! ```
//! use hlsgrab_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::from_retries(2);
//! let error = DownloadError::http_status("https://cdn.example/seg4.ts", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default number of retries after the first attempt of a segment.
pub const DEFAULT_SEGMENT_RETRIES: u32 = 0;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 403 Forbidden, invalid URL, cancellation.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// Jitter is at most 500ms and never more than half the base delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    /// A single attempt: segments are not retried unless asked for.
    fn default() -> Self {
        Self::from_retries(DEFAULT_SEGMENT_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` includes the initial attempt and is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy allowing `retries` retries after the first attempt,
    /// with default backoff settings.
    #[must_use]
    pub fn from_retries(retries: u32) -> Self {
        Self::new(
            retries.saturating_add(1),
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
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

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = multiplier^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_jitter_ms = MAX_JITTER.min(self.base_delay / 2).as_millis() as u64;
        if max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | Other HTTP 4xx | Permanent |
/// | Timeout, Network (non-TLS) | Transient |
/// | Network (TLS) | Permanent |
/// | Io, InvalidUrl, InvalidHeader, Cancelled, Interrupted | Permanent |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. } => FailureType::Transient,

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::InvalidHeader { .. }
        | DownloadError::Cancelled { .. }
        | DownloadError::Interrupted { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests

        // 403 from a CDN is usually an expired signed URL; retrying won't refresh it
        400..=499 => FailureType::Permanent,

        500..=599 => FailureType::Transient,

        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_retry_policy_from_retries() {
        assert_eq!(RetryPolicy::from_retries(3).max_attempts(), 4);
        assert_eq!(RetryPolicy::from_retries(u32::MAX).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_secs(1), 2.0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_delay_calculation_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);

        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4));
        assert!(third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_calculation_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        // 1 * 2^5 = 32s, capped at 5s
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy::from_retries(3);
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= MAX_JITTER);
        }
    }

    #[test]
    fn test_jitter_scaled_down_for_short_base_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(20), Duration::from_millis(100), 2.0);
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (400, FailureType::Permanent),
            (403, FailureType::Permanent),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (410, FailureType::Permanent),
            (429, FailureType::RateLimited),
            (500, FailureType::Transient),
            (502, FailureType::Transient),
            (503, FailureType::Transient),
            (504, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status("https://cdn.example/seg.ts", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_error(&DownloadError::timeout("https://cdn.example")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("not-a-url")),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::cancelled("https://cdn.example")),
            FailureType::Permanent
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/tmp/x", io_err)),
            FailureType::Permanent
        );
    }

    #[test]
    fn test_should_retry_permanent_does_not_retry() {
        let policy = RetryPolicy::from_retries(3);
        let decision = policy.should_retry(FailureType::Permanent, 1);
        match decision {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("permanent")),
            RetryDecision::Retry { .. } => panic!("permanent failures must not be retried"),
        }
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::from_retries(2);

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("attempt 3 of 3 must not retry"),
        }
    }
}
