//! HTTP fetch collaborator
//!
//! The crawl engine talks to the network only through the [`Fetcher`] trait:
//! - [`HttpFetcher`] is the reqwest implementation used by the binary
//! - any HTTP status is a successful fetch at this level;
//!   [`FetchResponse::error_for_status`] maps statuses onto [`FetchError`]
//! - transport failures come back as `FetchError::Network` or `FetchError::Timeout`

use crate::config::UserAgentConfig;
use crate::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, redirect::Policy, Client};
use std::time::{Duration, Instant};

/// Raw outcome of one HTTP request
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub status_code: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header, if present
    pub retry_after: Option<Duration>,
    pub elapsed: Duration,
}

impl FetchResponse {
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().map_or(true, |ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        })
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Maps non-success statuses onto the fetch error taxonomy
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Status is 2xx or 3xx
    /// * `Err(FetchError::RateLimited)` - HTTP 429, carrying any `Retry-After`
    /// * `Err(FetchError::ClientError)` - Any other 4xx
    /// * `Err(FetchError::ServerError)` - 5xx and anything unrecognized
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        match self.status_code {
            200..=399 => Ok(self),
            429 => Err(FetchError::RateLimited {
                retry_after: self.retry_after,
            }),
            400..=499 => Err(FetchError::ClientError {
                status: self.status_code,
            }),
            status => Err(FetchError::ServerError { status }),
        }
    }
}

/// Fetches a URL: `Fetch(url) -> (status, bytes, content type)`
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// Builds the HTTP client used for all crawl requests
///
/// The user agent is `Name/Version (+ContactURL; ContactEmail)`.
///
/// # Arguments
///
/// * `config` - Identity sent in the `User-Agent` header
/// * `timeout` - Whole-request timeout; connecting is capped at 10 seconds
///
/// # Returns
///
/// * `Ok(Client)` - Client following up to 10 redirects
/// * `Err(reqwest::Error)` - The TLS backend could not be initialized
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config, timeout)?))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let started = Instant::now();
        let response = self.client.get(url).send().await.map_err(classify_error)?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let body = response.bytes().await.map_err(classify_error)?.to_vec();

        tracing::trace!("GET {} -> {} ({} bytes)", url, status_code, body.len());

        Ok(FetchResponse {
            url: final_url,
            status_code,
            body,
            content_type,
            retry_after,
            elapsed: started.elapsed(),
        })
    }
}

fn classify_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Network(format!("connection failed: {}", error))
    } else {
        FetchError::Network(error.to_string())
    }
}

/// Parses a `Retry-After` value: delta seconds or an HTTP date
///
/// # Arguments
///
/// * `value` - Raw header value
/// * `now` - Reference time for HTTP dates
///
/// # Returns
///
/// * `Some(Duration)` - Delay to wait; a date in the past yields zero
/// * `None` - The value is neither form
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
