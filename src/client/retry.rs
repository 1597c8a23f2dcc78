//! Retry policy and backoff helper shared by every vendor call.
//!
//! [`with_backoff`] drives an operation that classifies its own failures as
//! [`Attempt::Retry`] or [`Attempt::Fail`]. Delays grow as
//! `base_delay * 2^attempt`, capped at `max_delay`, with equal jitter so
//! repeated runs against a throttled API do not retry in lockstep.

use rand::Rng;
use reqwest::{Error as ReqwestError, StatusCode};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Delay ceiling for the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Same policy with a different base delay
    pub fn with_base_delay(self, base_delay: Duration) -> Self {
        Self { base_delay, ..self }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay: half the ceiling plus a random share of the other half.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0..=ceiling - half);
        Duration::from_millis(half + jitter)
    }
}

/// Outcome of a failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Transient failure; try again if the budget allows
    Retry(RetryErrorType, E),
    /// Permanent failure; surface immediately
    Fail(E),
}

impl<E> Attempt<E> {
    /// Unwrap the underlying error
    pub fn into_inner(self) -> E {
        match self {
            Self::Retry(_, e) | Self::Fail(e) => e,
        }
    }
}

/// Classification of a failed call for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused or DNS failure
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 401/403
    AuthFailed(u16),
    /// Other 4xx
    ClientError(u16),
    /// Anything else
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "access denied (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation hint printed with the final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity or raise api.timeout_secs",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Reduce page size or run less often",
            Self::ServerError(_) => "KiotViet may be experiencing issues, try again later",
            Self::AuthFailed(_) => "Refresh the token file, the access token has likely expired",
            Self::ClientError(_) => "Review request parameters and retailer/branch ids",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether this kind of failure is worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed(_) | Self::ClientError(_))
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Delay before the next attempt
    pub backoff_duration: Duration,
    /// Endpoint or operation label
    pub endpoint: String,
    /// Last error message
    pub error_message: String,
}

impl RetryContext {
    /// Build a context
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        endpoint: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            endpoint: endpoint.into(),
            error_message: error_message.into(),
        }
    }

    /// Standard retry line.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.endpoint
        )
    }

    /// Final failure summary with a suggestion.
    pub fn format_failure(&self) -> String {
        [
            format!("[FAILED] {} failed after {} attempts", self.endpoint, self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }
}

/// Classify an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        let code = status.as_u16();
        match code {
            401 | 403 => return RetryErrorType::AuthFailed(code),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }
        if status.is_server_error() {
            return RetryErrorType::ServerError(code);
        }
        if status.is_client_error() {
            return RetryErrorType::ClientError(code);
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }
        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
///
/// `op` receives the 0-based attempt number. The last retryable error is
/// returned once `policy.max_retries` retries have been used.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(endpoint = label, attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(Attempt::Fail(error)) => return Err(error),
            Err(Attempt::Retry(kind, error)) => {
                if attempt >= policy.max_retries {
                    let context = RetryContext::new(
                        attempt + 1,
                        policy.max_attempts(),
                        kind,
                        Duration::ZERO,
                        label,
                        error.to_string(),
                    );
                    warn!("{}", context.format_failure());
                    return Err(error);
                }

                let delay = policy.delay_for(attempt);
                let context = RetryContext::new(
                    attempt + 1,
                    policy.max_attempts(),
                    kind,
                    delay,
                    label,
                    error.to_string(),
                );
                warn!(
                    endpoint = label,
                    attempt = attempt + 1,
                    error = %error,
                    "{}",
                    context.format_retry()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
