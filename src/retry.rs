//! Retry logic for transient failures and capped backoff
//!
//! [`with_retry`] wraps any idempotent HTTP call: connection failures and the
//! transient statuses 500/502/503/504/429/408 are retried after a fixed delay,
//! everything else is handed back to the caller untouched.
//!
//! [`Backoff`] is the multiplicative, capped sleep sequence used between polls
//! and between download resumptions.
//!
//! # Example
//!
//! ```no_run
//! use cdsapi::report::TracingReporter;
//! use cdsapi::retry::{RetryPolicy, with_retry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), reqwest::Error> {
//! let http = reqwest::Client::new();
//! let policy = RetryPolicy { max_attempts: 5, delay: Duration::from_secs(2) };
//! let response = with_retry(&policy, &TracingReporter, || {
//!     http.get("https://cds.climate.copernicus.eu/api/v2/status.json").send()
//! })
//! .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use crate::error::Error;
use crate::report::Reporter;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// HTTP statuses that indicate a transient server-side condition
pub const RETRIABLE_STATUSES: [StatusCode; 6] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::REQUEST_TIMEOUT,
];

/// Trait for outcomes that can be classified as retryable or not
///
/// Implemented both for successful call results (a response may carry a
/// transient status) and for call errors (a connection may have dropped).
pub trait IsRetryable {
    /// Returns true if the outcome is transient and the call should be repeated
    fn is_retryable(&self) -> bool;

    /// Short description used in the retry warning
    fn retry_reason(&self) -> String {
        "transient failure".to_string()
    }
}

impl IsRetryable for StatusCode {
    fn is_retryable(&self) -> bool {
        RETRIABLE_STATUSES.contains(self)
    }

    fn retry_reason(&self) -> String {
        format!("HTTP error: [{}]", self)
    }
}

impl IsRetryable for reqwest::Response {
    fn is_retryable(&self) -> bool {
        self.status().is_retryable()
    }

    fn retry_reason(&self) -> String {
        self.status().retry_reason()
    }
}

impl IsRetryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        // The call never produced a response
        self.is_connect() || self.is_timeout() || self.is_request()
    }

    fn retry_reason(&self) -> String {
        format!("Connection error: [{}]", self)
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_retryable(),
            Error::Http { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.is_retryable())
                .unwrap_or(false),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Everything the server decided about the job is final
            Error::Rejected(_)
            | Error::JobFailed { .. }
            | Error::UnknownState(_)
            | Error::Protocol(_)
            | Error::Timeout(_)
            | Error::Incomplete { .. } => false,
            Error::Config { .. }
            | Error::InvalidArgument(_)
            | Error::NotSupported(_)
            | Error::Serialization(_)
            | Error::Url(_) => false,
        }
    }

    fn retry_reason(&self) -> String {
        self.to_string()
    }
}

/// Bounded retry with a fixed delay between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of calls, the first one included (at least one call is made)
    pub max_attempts: u32,
    /// Fixed sleep between two calls
    pub delay: Duration,
}

/// Execute an async call, retrying transient outcomes
///
/// The call is made at most `policy.max_attempts` times. A non-retriable
/// outcome (success, non-transient HTTP status, non-connection error) is
/// returned on first sight. When the budget runs out the last outcome is
/// returned as-is, either the last transient response or the last connection
/// error; callers must treat both as a failed operation.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    reporter: &dyn Reporter,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: IsRetryable,
    E: IsRetryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = call().await;
        attempt += 1;

        let transient = match &outcome {
            Ok(value) if value.is_retryable() => Some(value.retry_reason()),
            Err(e) if e.is_retryable() => Some(e.retry_reason()),
            _ => None,
        };
        let Some(reason) = transient else {
            return outcome;
        };

        reporter.warning(&format!(
            "{reason}. Attempt {attempt} of {max_attempts}."
        ));

        if attempt >= max_attempts {
            return outcome;
        }

        reporter.warning(&format!(
            "Retrying in {} seconds",
            policy.delay.as_secs_f64()
        ));
        tokio::time::sleep(policy.delay).await;
        reporter.info("Retrying now...");
    }
}

/// Multiplicative sleep sequence with a ceiling
///
/// Yields the current value, then grows it by `factor`, never exceeding `max`.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    /// Growth factor used by polling and download resumption
    pub const DEFAULT_FACTOR: f64 = 1.5;

    /// Create a backoff starting at `initial`, clipped at `max`
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            factor,
            max,
        }
    }

    /// Value the next call to [`Backoff::next_delay`] will return
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Return the current delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::from_secs_f64(self.current.as_secs_f64() * self.factor);
        self.current = grown.min(self.max);
        delay
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::RecordingReporter;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stand-in for a response: carries only a status
    #[derive(Debug)]
    struct FakeResponse(StatusCode);

    impl IsRetryable for FakeResponse {
        fn is_retryable(&self) -> bool {
            self.0.is_retryable()
        }
    }

    #[derive(Debug)]
    enum FakeError {
        Connection,
        Fatal,
    }

    impl IsRetryable for FakeError {
        fn is_retryable(&self) -> bool {
            matches!(self, FakeError::Connection)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(5), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(FakeResponse(StatusCode::OK))
            }
        })
        .await;

        assert_eq!(result.unwrap().0, StatusCode::OK);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
        assert!(reporter.at("warning").is_empty());
    }

    #[tokio::test]
    async fn test_non_retriable_status_returned_immediately() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(5), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(FakeResponse(StatusCode::NOT_FOUND))
            }
        })
        .await;

        assert_eq!(result.unwrap().0, StatusCode::NOT_FOUND);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(5), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(FakeError::Connection),
                    1 => Ok(FakeResponse(StatusCode::SERVICE_UNAVAILABLE)),
                    _ => Ok(FakeResponse(StatusCode::OK)),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap().0, StatusCode::OK);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let warnings = reporter.at("warning");
        assert!(warnings.iter().any(|w| w.contains("Attempt 1 of 5")));
        assert!(warnings.iter().any(|w| w.contains("Attempt 2 of 5")));
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_response() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(3), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(FakeResponse(StatusCode::BAD_GATEWAY))
            }
        })
        .await;

        assert_eq!(result.unwrap().0, StatusCode::BAD_GATEWAY);
        assert_eq!(counter.load(Ordering::SeqCst), 3, "at most max_attempts calls");
    }

    #[tokio::test]
    async fn test_exhausted_on_connection_error_returns_error() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(2), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<FakeResponse, _>(FakeError::Connection)
            }
        })
        .await;

        assert!(matches!(result, Err(FakeError::Connection)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        // one sleep between the two attempts, none after the last
        let sleeps = reporter
            .at("warning")
            .into_iter()
            .filter(|w| w.starts_with("Retrying in"))
            .count();
        assert_eq!(sleeps, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_no_retry() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&policy(5), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<FakeResponse, _>(FakeError::Fatal)
            }
        })
        .await;

        assert!(matches!(result, Err(FakeError::Fatal)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_still_calls_once() {
        let reporter = RecordingReporter::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _ = with_retry(&policy(0), &reporter, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(FakeResponse(StatusCode::INTERNAL_SERVER_ERROR))
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retriable_statuses() {
        for code in [500, 502, 503, 504, 429, 408] {
            assert!(StatusCode::from_u16(code).unwrap().is_retryable(), "{code}");
        }
        for code in [200, 201, 202, 400, 401, 403, 404, 501] {
            assert!(!StatusCode::from_u16(code).unwrap().is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(
            Error::Http {
                status: 503,
                url: String::new(),
                message: String::new(),
            }
            .is_retryable()
        );
        assert!(
            !Error::JobFailed {
                message: "m".into(),
                reason: "r".into(),
            }
            .is_retryable()
        );
        assert!(!Error::UnknownState("zombie".into()).is_retryable());
    }

    #[test]
    fn test_poll_backoff_sequence() {
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Backoff::DEFAULT_FACTOR,
            Duration::from_secs(120),
        );
        let first: Vec<f64> = (0..4).map(|_| backoff.next_delay().as_secs_f64()).collect();
        assert_eq!(first, vec![1.0, 1.5, 2.25, 3.375]);

        let mut previous = backoff.peek();
        for _ in 0..50 {
            let next = backoff.next_delay();
            assert!(next >= previous, "sequence must not decrease");
            assert!(next <= Duration::from_secs(120));
            previous = next;
        }
        assert_eq!(backoff.peek(), Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_initial_above_cap_is_clipped() {
        let mut backoff = Backoff::new(
            Duration::from_secs(10),
            Backoff::DEFAULT_FACTOR,
            Duration::from_secs(5),
        );
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
