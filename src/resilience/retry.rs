//! Retry logic with exponential backoff for transient failures.
//!
//! Failed attempts are retried with increasing delays only when the failure
//! is classified retryable. Everything else surfaces on the first attempt so
//! callers can take their own recovery path (credential refresh, hard error).

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NetworkCause, RequestError};
use crate::scheduler::Scheduler;

/// HTTP statuses the engine retries on its own: request timeout and rate
/// limiting. 401 and 5xx are deliberately absent.
pub const RETRYABLE_STATUSES: [u16; 2] = [408, 429];

/// Fetch-layer error signatures that mark a transport failure as transient.
///
/// Matched against the flattened error chain. The generic `reqwest` prefix
/// ("error sending request") is not on the list: it heads nearly every send
/// error, so the cause further down the chain decides.
pub const RETRYABLE_SIGNATURES: [&str; 6] = [
    "failed to fetch",
    "network error",
    "connection reset",
    "connection closed",
    "broken pipe",
    "unexpected eof",
];

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further one.
    #[serde(with = "crate::serde_millis")]
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
    /// Spread delays by ±25% to keep parallel clients from retrying in step.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total number of attempts this budget allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff after the failed attempt `attempt` (0-indexed):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return delay;
        }

        let millis = delay.as_millis() as u64;
        let spread = millis / 4;
        if spread == 0 {
            return delay;
        }
        let jittered = millis - spread + fastrand::u64(0..=spread * 2);
        Duration::from_millis(jittered)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Whether a transport error message matches one of the known transient
/// fetch-layer signatures.
pub fn is_retryable_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SIGNATURES
        .iter()
        .any(|signature| lower.contains(signature))
}

/// Retry classification used by the request engine.
pub fn is_retryable_error(error: &RequestError) -> bool {
    match error {
        RequestError::Http { status, .. } => is_retryable_status(*status),
        RequestError::Timeout { .. } => true,
        RequestError::Network { cause, message } => {
            matches!(cause, NetworkCause::Connect | NetworkCause::Reset)
                || is_retryable_signature(message)
        }
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T, E> {
    /// Final value, or the last observed error.
    pub result: Result<T, E>,
    /// Number of attempts made (1 = first try settled it).
    pub attempts: u32,
    /// Wall time across all attempts and backoff waits.
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Execute an async operation with retry logic.
///
/// `operation` receives the 0-indexed attempt number. A failure stops the
/// loop when `is_retryable` rejects it or the budget is spent; otherwise the
/// scheduler waits out the backoff before the next attempt.
///
/// # Example
///
/// ```ignore
/// let outcome = execute_with_retry(
///     &RetryConfig::default(),
///     &TokioScheduler,
///     is_retryable_error,
///     |_| engine.send_once(&request),
/// )
/// .await;
/// ```
pub async fn execute_with_retry<T, E, F, Fut, C>(
    config: &RetryConfig,
    scheduler: &dyn Scheduler,
    is_retryable: C,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                };
            }
            Err(error) => {
                if attempt >= config.max_retries || !is_retryable(&error) {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                    };
                }

                let delay = config.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retryable failure, backing off"
                );
                scheduler.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ResponseBody;
    use crate::scheduler::VirtualScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert!(!config.jitter);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let config = RetryConfig::default().with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_respects_max() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_millis(1500));

        assert_eq!(config.delay_for(5), Duration::from_millis(1500));
        assert_eq!(config.delay_for(40), Duration::from_millis(1500));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(400))
            .with_jitter(true);

        for _ in 0..50 {
            let delay = config.delay_for(0);
            assert!(delay >= Duration::from_millis(300));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        for status in [400, 401, 403, 404, 409, 500, 502, 503, 504] {
            assert!(!is_retryable_status(status), "{status} must not retry");
        }
    }

    #[test]
    fn test_network_classification() {
        assert!(is_retryable_error(&RequestError::network(
            NetworkCause::Connect,
            "dns lookup failed"
        )));
        assert!(is_retryable_error(&RequestError::network(
            NetworkCause::Request,
            "error sending request for url (http://x/): connection closed before message completed"
        )));
        assert!(!is_retryable_error(&RequestError::network(
            NetworkCause::Request,
            "error sending request for url (http://x/): invalid HTTP header parsed"
        )));
        assert!(is_retryable_error(&RequestError::network(
            NetworkCause::Body,
            "Connection reset by peer"
        )));
        assert!(!is_retryable_error(&RequestError::network(
            NetworkCause::Other,
            "relative URL without a base"
        )));
        assert!(is_retryable_error(&RequestError::timeout(Duration::from_secs(1))));
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let scheduler = VirtualScheduler::new();
        let outcome = execute_with_retry(
            &RetryConfig::default(),
            &scheduler,
            is_retryable_error,
            |_| async { Ok::<_, RequestError>("done") },
        )
        .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert!(scheduler.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_eventual_success_backs_off() {
        let scheduler = VirtualScheduler::new();
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default().with_base_delay(Duration::from_millis(10));

        let outcome = execute_with_retry(&config, &scheduler, is_retryable_error, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RequestError::http(429, ResponseBody::Empty))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.into_result().unwrap(), 2);
        assert_eq!(
            scheduler.sleeps(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let scheduler = VirtualScheduler::new();
        let outcome: RetryOutcome<(), _> = execute_with_retry(
            &RetryConfig::default().with_max_retries(5),
            &scheduler,
            is_retryable_error,
            |_| async { Err(RequestError::http(500, ResponseBody::Empty)) },
        )
        .await;

        assert_eq!(outcome.attempts, 1);
        assert!(scheduler.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let scheduler = VirtualScheduler::new();
        let outcome: RetryOutcome<(), _> = execute_with_retry(
            &RetryConfig::default().with_max_retries(2),
            &scheduler,
            is_retryable_error,
            |attempt| async move {
                Err(RequestError::network(
                    NetworkCause::Connect,
                    format!("refused #{attempt}"),
                ))
            },
        )
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err().message(), "refused #2");
        assert_eq!(scheduler.sleeps().len(), 2);
    }
}
