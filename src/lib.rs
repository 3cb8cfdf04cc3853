//! Sumi-Tide: a polite change-tracking crawler
//!
//! This crate implements the crawl execution engine of a website monitor: a
//! bounded-concurrency processing pipeline, an adaptive per-domain rate limiter
//! with circuit-breaker fault isolation, content version tracking with change
//! classification, and a quality-driven priority frontier.

pub mod change;
pub mod config;
pub mod crawler;
pub mod output;
pub mod pipeline;
pub mod robots;
pub mod state;
pub mod storage;
pub mod strategy;
pub mod throttle;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Sumi-Tide operations
#[derive(Debug, Error)]
pub enum TideError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error for {url}: {source}")]
    Fetch { url: String, source: FetchError },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Content processing failed for {url}: {message}")]
    Processing { url: String, message: String },

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Outcome of a single fetch attempt that did not produce usable content
///
/// The variants follow the crawl error taxonomy: transient failures are
/// retried, rate limiting is honoured through the rate limiter, and client
/// errors are surfaced as-is.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error (HTTP {status})")]
    ServerError { status: u16 },

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("client error (HTTP {status})")]
    ClientError { status: u16 },
}

impl FetchError {
    /// Returns true for failures worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::ServerError { .. }
        )
    }

    /// Returns true when the failure says something about the domain's capacity
    ///
    /// These count against the circuit breaker. Client errors do not.
    pub fn is_capacity_signal(&self) -> bool {
        !matches!(self, Self::ClientError { .. })
    }

    /// HTTP status associated with this failure, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ServerError { status } | Self::ClientError { status } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Network(_) | Self::Timeout => None,
        }
    }
}

/// Result type alias for Sumi-Tide operations
pub type Result<T> = std::result::Result<T, TideError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use change::{ChangeResult, ChangeType, ContentChangeDetector, PageVersion};
pub use config::Config;
pub use crawler::{Coordinator, CrawlReport};
pub use pipeline::{PipelineStatus, ProcessingPipeline, ProcessingResult};
pub use strategy::{AdaptiveCrawlStrategy, FrontierEntry};
pub use throttle::{AdaptiveRateLimiter, CircuitBreaker, RetryPolicy};
pub use url::{extract_domain, normalize_url};
