//! Error types for the benchmark engine
//!
//! Errors raised inside the engine are structured (`Http`, `Timeout`, `Cancelled`, ...)
//! and map directly onto an [`ErrorCategory`]. Errors that cross the provider boundary
//! as opaque text (`Provider`) fall back to substring classification.

use crate::retry::parse_retry_after_text;
use crate::types::OperationType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for benchmark engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during benchmark operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Test definition failed validation
    #[error("Invalid test '{name}': {reason}")]
    InvalidTest { name: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success HTTP response
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Connection-level failure (refused, reset, DNS, EOF)
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The surrounding cancellation scope was cancelled
    #[error("operation canceled")]
    Cancelled,

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider was asked for an operation it does not implement
    #[error("Provider '{provider}' does not support {operation}")]
    Unsupported { provider: String, operation: OperationType },

    /// Crawl finished without usable pages
    #[error("Crawl failed: {0}")]
    CrawlFailed(String),

    /// Opaque provider failure
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// Retry budget exhausted; carries the last underlying cause
    #[error("max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Embedding or reranker service failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Benchmark execution error
    #[error("Benchmark error: {0}")]
    Benchmark(String),

    /// A provider call panicked
    #[error("Provider panicked: {0}")]
    Panic(String),
}

impl Error {
    /// Create an opaque provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, looking through retry wrappers
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::MaxRetriesExceeded { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether this error came from a cancelled scope
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::MaxRetriesExceeded { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Server-supplied pacing hint, from a header or from the error text
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http {
                retry_after, message, ..
            } => retry_after.or_else(|| parse_retry_after_text(message)),
            Self::Provider { message, .. } => parse_retry_after_text(message),
            _ => None,
        }
    }

    /// Map this error onto the reporting taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Canceled,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Http { status, message, .. } => ErrorCategory::from_status(*status)
                .unwrap_or_else(|| ErrorCategory::classify(message)),
            Self::Network(_) => ErrorCategory::Network,
            Self::Parse(_) | Self::Json(_) | Self::Toml(_) => ErrorCategory::Parse,
            Self::Validation(_) | Self::Config(_) | Self::InvalidTest { .. } | Self::Unsupported { .. } => {
                ErrorCategory::Validation
            }
            Self::CrawlFailed(_) => ErrorCategory::CrawlFailed,
            Self::MaxRetriesExceeded { source, .. } => source.category(),
            Self::Panic(_) => ErrorCategory::Unknown,
            Self::Io(err) => ErrorCategory::classify(&err.to_string()),
            Self::Provider { message, .. } | Self::Embedding(message) | Self::Benchmark(message) => {
                ErrorCategory::classify(message)
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
                retry_after: None,
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Reporting taxonomy for failed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Auth,
    ServerError,
    ClientError,
    Network,
    Parse,
    Canceled,
    Validation,
    NotFound,
    CrawlFailed,
    Unknown,
}

/// Substring rules in priority order. Cancellation and rate limiting are checked
/// before the generic status families so "429" text or a cancelled deadline is not
/// reported as a plain client error or timeout.
const CLASSIFICATION_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Canceled,
        &["context canceled", "cancelled", "canceled"],
    ),
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        ErrorCategory::RateLimit,
        &["429", "rate limit", "ratelimit", "rate-limit", "too many requests", "quota exceeded"],
    ),
    (
        ErrorCategory::Auth,
        &["401", "403", "unauthorized", "forbidden", "invalid api key", "authentication"],
    ),
    (ErrorCategory::NotFound, &["404", "not found"]),
    (
        ErrorCategory::ServerError,
        &[
            "500",
            "502",
            "503",
            "504",
            "internal server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
            "server error",
        ],
    ),
    (
        ErrorCategory::ClientError,
        &["400", "405", "409", "410", "413", "422", "bad request", "client error"],
    ),
    (
        ErrorCategory::Network,
        &[
            "connection reset",
            "connection refused",
            "broken pipe",
            "eof",
            "no such host",
            "dns",
            "network",
        ],
    ),
    (
        ErrorCategory::Parse,
        &["parse", "unmarshal", "decode", "invalid json", "deserialize"],
    ),
    (ErrorCategory::Validation, &["validation", "invalid input", "missing required"]),
    (ErrorCategory::CrawlFailed, &["crawl failed", "crawl error"]),
];

impl ErrorCategory {
    /// Classify an opaque error message
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        CLASSIFICATION_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| lowered.contains(needle)))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Unknown)
    }

    /// Category implied by an HTTP status alone
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimit),
            401 | 403 => Some(Self::Auth),
            404 => Some(Self::NotFound),
            408 => Some(Self::Timeout),
            500..=599 => Some(Self::ServerError),
            400..=499 => Some(Self::ClientError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Canceled => "canceled",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::CrawlFailed => "crawl_failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
