//! Retry logic with exponential backoff for transient failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying errors and determining retry behavior.
//!
//! # Overview
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::NeedsAuth`] - The session was rejected
//! - [`FailureType::RateLimited`] - Server rate limiting (retries with backoff)
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count. The default policy never gives up on transient failures;
//! delays come from a pluggable [`Backoff`].
//!
//! # Example
//!
//! ```
//! use harvest_core::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::with_max_attempts(3);
//! let error = DownloadError::http_status("https://cdn.example.com/a.jpg", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::DownloadError;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Classification of failure types.
///
/// Used to determine whether a failed request should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, missing page element, invalid URL.
    Permanent,

    /// Authentication or authorization required.
    ///
    /// The session bundle was rejected; retrying with the same cookies is pointless.
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
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

/// Errors that know how they should be retried.
pub trait Retryable: fmt::Display {
    /// Classifies the error for [`RetryPolicy::should_retry`].
    fn failure_type(&self) -> FailureType;
}

impl Retryable for DownloadError {
    fn failure_type(&self) -> FailureType {
        classify_error(self)
    }
}

/// Computes the wait before a retry.
pub trait Backoff: fmt::Debug + Send + Sync {
    /// Returns the delay before retry number `retry` (1 = first retry).
    fn delay(&self, retry: u32) -> Duration;
}

/// `base * multiplier^(retry - 1)`, optionally capped, plus optional random jitter.
///
/// The default doubles from one second with no cap and no jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    multiplier: u32,
    max_delay: Option<Duration>,
    max_jitter: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

impl ExponentialBackoff {
    /// Creates a doubling backoff starting at `base`.
    #[must_use]
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: None,
            max_jitter: Duration::ZERO,
        }
    }

    /// Sets the growth factor (minimum 1).
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Caps every delay at `max_delay`.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Adds up to `max_jitter` of random delay to every wait.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        let delay = self.base.saturating_mul(factor);
        let delay = match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        };
        delay.saturating_add(self.jitter())
    }
}

/// Retry behavior: an optional attempt ceiling plus a backoff schedule.
///
/// `max_attempts = None` retries transient failures forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt), if any.
    max_attempts: Option<u32>,

    backoff: Arc<dyn Backoff>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }
}

/// Result of [`RetryPolicy::run`] when the operation eventually succeeded.
#[derive(Debug)]
pub struct Retried<T> {
    /// The operation's output.
    pub value: T,
    /// Delays waited before each retry, in order.
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Unbounded retries with the default doubling backoff.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Creates a policy with an attempt ceiling, using the default backoff.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            ..Self::default()
        }
    }

    /// Replaces the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Returns the attempt ceiling, if any.
    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication rejected - retry with the same session would not help"
                        .to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            debug!(attempt, max, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({max}) exhausted"),
            };
        }

        let delay = self.backoff.delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt.saturating_add(1),
        }
    }

    /// Runs `operation` until it succeeds or [`Self::should_retry`] gives up.
    ///
    /// # Errors
    ///
    /// Returns the last error once the failure is non-retryable or the attempt
    /// ceiling is reached.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<Retried<T>, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;
        let mut delays = Vec::new();
        loop {
            match operation().await {
                Ok(value) => return Ok(Retried { value, delays }),
                Err(error) => match self.should_retry(error.failure_type(), attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        info!(
                            operation = label,
                            attempt,
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delays.push(delay);
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(operation = label, attempt, %reason, error = %error, "giving up");
                        return Err(error);
                    }
                },
            }
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type |
/// |--------|------|
/// | 401, 403 | NeedsAuth |
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | other 4xx | Permanent |
/// | 5xx | Transient |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (most) | Transient |
/// | Network (TLS) | Permanent |
/// | IO, InvalidUrl, NoFilename, Client | Permanent |
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
        | DownloadError::NoFilename { .. }
        | DownloadError::Client { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 => FailureType::NeedsAuth,   // Unauthorized
        403 => FailureType::NeedsAuth,   // Forbidden
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
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
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::unbounded().with_backoff(ExponentialBackoff::new(Duration::from_millis(1)))
    }

    #[test]
    fn test_retry_policy_default_is_unbounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), None);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 10_000),
            RetryDecision::Retry { attempt: 10_001, .. }
        ));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), Some(1));
    }

    #[test]
    fn test_exponential_backoff_doubles_from_one_second() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_backoff_respects_max_delay() {
        let backoff = ExponentialBackoff::default().with_max_delay(Duration::from_secs(5));
        assert_eq!(backoff.delay(6), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_saturates_instead_of_overflowing() {
        let backoff = ExponentialBackoff::default();
        assert!(backoff.delay(u32::MAX) >= Duration::from_secs(1 << 31));
    }

    #[test]
    fn test_exponential_backoff_jitter_within_bounds() {
        let backoff = ExponentialBackoff::default().with_jitter(Duration::from_millis(500));
        for _ in 0..100 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (400, FailureType::Permanent),
            (401, FailureType::NeedsAuth),
            (403, FailureType::NeedsAuth),
            (404, FailureType::Permanent),
            (408, FailureType::Transient),
            (429, FailureType::RateLimited),
            (500, FailureType::Transient),
            (503, FailureType::Transient),
        ];
        for (status, expected) in cases {
            let error = DownloadError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), expected, "status {status}");
        }
    }

    #[test]
    fn test_classify_local_errors_permanent() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/path/to/file", io_err)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("not-a-url")),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::timeout("http://example.com")),
            FailureType::Transient
        );
    }

    #[test]
    fn test_should_retry_permanent_does_not_retry() {
        let decision = RetryPolicy::default().should_retry(FailureType::Permanent, 1);
        match decision {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("permanent")),
            RetryDecision::Retry { .. } => panic!("expected DoNotRetry"),
        }
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { .. }
        ));
        match policy.should_retry(FailureType::Transient, 3) {
            RetryDecision::DoNotRetry { reason } => assert!(reason.contains("exhausted")),
            RetryDecision::Retry { .. } => panic!("expected DoNotRetry"),
        }
    }

    #[tokio::test]
    async fn test_run_retries_until_success_with_increasing_delays() {
        let calls = AtomicU32::new(0);
        let outcome = fast_policy()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(DownloadError::http_status("http://example.com", 503))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, 3);
        assert_eq!(
            outcome.delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<Retried<()>, DownloadError> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DownloadError::http_status("http://example.com", 404)) }
            })
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_honors_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::with_max_attempts(2)
            .with_backoff(ExponentialBackoff::new(Duration::from_millis(1)));
        let result: Result<Retried<()>, DownloadError> = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DownloadError::timeout("http://example.com")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
