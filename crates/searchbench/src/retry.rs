//! Retry with exponential backoff, jitter and `Retry-After` hints
//!
//! [`RetryPolicy`] shields a single operation. Failures are classified as retryable
//! by HTTP status (configured set) or, for opaque errors, by transient indicators in
//! the error text. A server-provided `Retry-After` hint replaces the computed backoff
//! for the next attempt. Every suspension observes the caller's cancellation token.

use crate::config::RetryConfig;
use crate::ratelimit::RateLimiter;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lower-cased fragments that mark an opaque error as transient
const TRANSIENT_INDICATORS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "connection reset",
    "eof",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "temporarily unavailable",
];

/// Longest body excerpt kept in an HTTP error message
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Relative jitter applied to computed backoff (±25%)
const JITTER_FRACTION: f64 = 0.25;

static RETRY_AFTER_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)retry[-_ ]?after["']?\s*[:=]?\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?"#)
        .expect("Retry-After text regex pattern is valid and should compile")
});
static TRY_AGAIN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)try again in\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?")
        .expect("Try-again text regex pattern is valid and should compile")
});

/// Seconds as a `Duration`; hints too large to represent saturate at `Duration::MAX`
fn hint_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Parse a `Retry-After` header value: delta-seconds or an HTTP-date
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<f64>() {
        return hint_from_secs(secs);
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Look for a retry hint embedded in an error body or message
pub fn parse_retry_after_text(text: &str) -> Option<Duration> {
    let captures = RETRY_AFTER_TEXT
        .captures(text)
        .or_else(|| TRY_AGAIN_TEXT.captures(text))?;

    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;

    let unit = captures.get(2).map(|m| m.as_str().to_lowercase());
    let secs = match unit.as_deref() {
        Some(u) if u.starts_with("ms") || u.starts_with("milli") => amount / 1000.0,
        _ => amount,
    };
    hint_from_secs(secs)
}

/// Fully read HTTP response returned by [`RetryPolicy::do_http_request_detailed`]
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    /// Number of attempts it took to obtain this response
    pub attempts: u32,
}

impl HttpResponse {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| Error::Parse(format!("invalid JSON response: {}", e)))
    }
}

/// Bounded retry wrapper for a single operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    limiter: Option<Arc<RateLimiter>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, limiter: None }
    }

    /// Pace every attempt through `limiter`
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether a failed attempt may be retried
    pub fn is_retryable(&self, err: &Error) -> bool {
        match err {
            Error::Cancelled | Error::MaxRetriesExceeded { .. } => false,
            Error::Http { status, .. } => self.config.retryable_statuses.contains(status),
            Error::Timeout(_) | Error::Network(_) => true,
            Error::Provider { message, .. } | Error::Embedding(message) | Error::Benchmark(message) => {
                is_transient_text(message)
            }
            Error::Io(io) => is_transient_text(&io.to_string()),
            _ => false,
        }
    }

    /// Backoff before retry number `retry` (0-based): `initial * factor^retry`,
    /// jittered by ±25% and capped at `max_backoff`
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base_us = self.config.initial_backoff.as_micros() as f64 * self.config.backoff_factor.powi(retry as i32);
        let jittered_us = if self.config.jitter {
            let factor = rand::thread_rng().gen_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
            base_us * factor
        } else {
            base_us
        };

        let capped_us = jittered_us.min(self.config.max_backoff.as_micros() as f64);
        if capped_us.is_finite() && capped_us > 0.0 {
            Duration::from_micros(capped_us.round() as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Delay before the next attempt, honouring a server hint when present
    fn delay_after(&self, err: &Error, retry: u32) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.config.max_retry_after),
            None => self.backoff_for(retry),
        }
    }

    /// Run `operation` with up to `max_retries + 1` attempts
    ///
    /// The closure receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// - The operation's own error when it is not retryable
    /// - [`Error::Cancelled`] when `cancel` fires before or between attempts
    /// - [`Error::MaxRetriesExceeded`] wrapping the last cause when the budget runs out
    pub async fn do_with_retry<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if let Some(limiter) = &self.limiter {
                limiter.wait(cancel).await?;
            }

            attempt += 1;
            let outcome = tokio::select! {
                result = operation(attempt) => result,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_cancelled() || !self.is_retryable(&err) {
                debug!(attempt, error = %err, "not retrying");
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "retry budget exhausted");
                return Err(Error::MaxRetriesExceeded {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_after(&err, attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// Send an HTTP request with retries and return the fully read response
    ///
    /// Non-2xx responses become [`Error::Http`] carrying any `Retry-After` hint from
    /// the header or the body.
    ///
    /// # Errors
    ///
    /// Same as [`RetryPolicy::do_with_retry`]; additionally [`Error::Validation`] when
    /// the request body is a stream that cannot be replayed.
    pub async fn do_http_request_detailed(
        &self,
        cancel: &CancellationToken,
        request: reqwest::RequestBuilder,
    ) -> Result<HttpResponse> {
        self.do_with_retry(cancel, |attempt| {
            let request = request.try_clone();
            async move {
                let request = request
                    .ok_or_else(|| Error::Validation("request body cannot be replayed for retries".to_string()))?;

                let response = request.send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                let header_hint = headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after_header);
                let body = response.text().await?;

                if status.is_success() {
                    return Ok(HttpResponse {
                        status: status.as_u16(),
                        headers,
                        body,
                        attempts: attempt,
                    });
                }

                let retry_after = header_hint.or_else(|| parse_retry_after_text(&body));
                let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
                let message = match (status.canonical_reason(), excerpt.trim().is_empty()) {
                    (Some(reason), true) => reason.to_string(),
                    (Some(reason), false) => format!("{}: {}", reason, excerpt.trim()),
                    (None, _) => excerpt.trim().to_string(),
                };

                Err(Error::Http {
                    status: status.as_u16(),
                    message,
                    retry_after,
                })
            }
        })
        .await
    }
}

fn is_transient_text(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_INDICATORS.iter().any(|needle| lowered.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            backoff_factor: 2.0,
            jitter: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_then_success_takes_two_attempts() {
        let policy = RetryPolicy::new(fast_config(1));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = policy
            .do_with_retry(&cancel, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::provider("mock", "503 service unavailable"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_returns_after_one_attempt() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .do_with_retry(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::Http {
                        status: 401,
                        message: "invalid api key".into(),
                        retry_after: None,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Http { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_cause() {
        let policy = RetryPolicy::new(fast_config(2));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .do_with_retry(&cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(Error::Timeout(format!("attempt {attempt} timed out"))) }
            })
            .await;

        match result {
            Err(Error::MaxRetriesExceeded { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("attempt 3"));
            }
            other => panic!("expected MaxRetriesExceeded, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_backoff_sleep() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<()> = policy
            .do_with_retry(&cancel, |_| async { Err(Error::Network("connection reset".into())) })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_after_hint_overrides_backoff() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            jitter: false,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let result = policy
            .do_with_retry(&cancel, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::Http {
                            status: 429,
                            message: "slow down".into(),
                            retry_after: Some(Duration::from_millis(20)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_secs(2), "hint was not applied");
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            backoff_factor: 2.0,
            jitter: false,
            ..Default::default()
        });
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::new(RetryConfig {
            initial_backoff: Duration::from_millis(400),
            max_backoff: Duration::from_secs(60),
            backoff_factor: 1.0,
            jitter: true,
            ..Default::default()
        });
        for _ in 0..200 {
            let delay = policy.backoff_for(0);
            assert!(delay >= Duration::from_millis(299) && delay <= Duration::from_millis(501));
        }
    }

    #[test]
    fn test_classification() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let http = |status| Error::Http {
            status,
            message: String::new(),
            retry_after: None,
        };

        assert!(policy.is_retryable(&http(429)));
        assert!(policy.is_retryable(&http(503)));
        assert!(!policy.is_retryable(&http(400)));
        assert!(!policy.is_retryable(&http(404)));
        assert!(policy.is_retryable(&Error::provider("p", "unexpected EOF")));
        assert!(policy.is_retryable(&Error::provider("p", "Rate limit reached")));
        assert!(!policy.is_retryable(&Error::provider("p", "invalid query syntax")));
        assert!(!policy.is_retryable(&Error::Cancelled));
        assert!(!policy.is_retryable(&Error::Parse("bad json".into())));
    }

    #[test]
    fn test_parse_retry_after_header() {
        assert_eq!(parse_retry_after_header("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after_header(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after_header("Wed, 21 Oct 2015 07:28:00 GMT"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after_header("soon"), None);
        assert_eq!(parse_retry_after_header(""), None);
    }

    #[test]
    fn test_parse_retry_after_text() {
        assert_eq!(parse_retry_after_text("Please retry after 3s"), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_after_text(r#"{"error":"rate limited","retry_after": 2}"#),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            parse_retry_after_text("Retry-After: 250ms"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_retry_after_text("Rate limit reached. Please try again in 1.5 seconds."),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after_text("no hint here"), None);
    }

    #[test]
    fn test_oversized_hints_saturate_and_are_capped() {
        assert_eq!(parse_retry_after_header("1e30"), Some(Duration::MAX));
        assert_eq!(parse_retry_after_header("-5"), None);
        assert_eq!(
            parse_retry_after_text("retry after 99999999999999999999999 seconds"),
            Some(Duration::MAX)
        );

        let policy = RetryPolicy::new(RetryConfig {
            max_retry_after: Duration::from_secs(60),
            ..Default::default()
        });
        let err = Error::Http {
            status: 429,
            message: "retry after 99999999999999999999999 seconds".into(),
            retry_after: parse_retry_after_header("1e30"),
        };
        assert_eq!(policy.delay_after(&err, 0), Duration::from_secs(60));
        assert_eq!(err.category(), crate::ErrorCategory::RateLimit);
    }
}
