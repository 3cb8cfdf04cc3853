use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Tide
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(rename = "circuit-breaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "change-detection", default)]
    pub change_detection: ChangeDetectionConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteEntry>,
}

impl Config {
    /// Returns every configured seed with the priority of its site
    pub fn seeds(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.sites
            .iter()
            .flat_map(|site| site.seeds.iter().map(move |s| (s.as_str(), site.priority)))
    }

    /// Returns the allow-listed domain patterns
    pub fn allowed_domains(&self) -> Vec<String> {
        self.sites.iter().map(|site| site.domain.clone()).collect()
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Maximum depth to crawl from seed URLs
    pub max_depth: u32,

    /// Number of pipeline workers processing URLs in parallel
    pub worker_count: usize,

    /// Maximum queued plus in-flight items in the pipeline
    pub queue_capacity: usize,

    /// Per-item processing timeout (milliseconds)
    pub per_item_timeout_ms: u64,

    /// Interval between pipeline status snapshots (milliseconds)
    pub metrics_interval_ms: u64,

    /// Maximum pages dispatched per crawl run (0 = unlimited)
    pub max_pages: usize,

    /// Follow links that leave the allow-listed domains
    pub allow_external_links: bool,

    /// Delay between runs in continuous mode (seconds)
    pub continuous_interval_secs: u64,

    /// Consult robots.txt before fetching
    pub respect_robots: bool,
}

impl CrawlerConfig {
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_millis(self.per_item_timeout_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn continuous_interval(&self) -> Duration {
        Duration::from_secs(self.continuous_interval_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            worker_count: 4,
            queue_capacity: 64,
            per_item_timeout_ms: 30_000,
            metrics_interval_ms: 5_000,
            max_pages: 0,
            allow_external_links: false,
            continuous_interval_secs: 3_600,
            respect_robots: true,
        }
    }
}

/// Adaptive rate limiter tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    /// Starting rate for a domain seen for the first time
    pub initial_requests_per_minute: f64,

    /// Smallest spacing between requests; bounds the maximum rate
    pub min_delay_ms: u64,

    /// Largest spacing between requests; bounds the minimum rate
    pub max_delay_ms: u64,

    /// Gradual multiplicative step used for increases and slow-response decreases
    pub adaptive_factor: f64,

    /// Multiplier applied on 429 and 5xx responses
    pub penalty_factor: f64,

    /// Responses slower than this reduce the rate
    pub slow_response_threshold_ms: f64,

    /// Responses faster than this count toward a rate increase
    pub fast_response_threshold_ms: f64,

    /// Fast responses required before the rate is raised
    pub successes_before_increase: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_requests_per_minute: 60.0,
            min_delay_ms: 250,
            max_delay_ms: 60_000,
            adaptive_factor: 0.1,
            penalty_factor: 0.5,
            slow_response_threshold_ms: 2_000.0,
            fast_response_threshold_ms: 500.0,
            successes_before_increase: 3,
        }
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a domain's circuit
    pub failure_threshold: u32,

    /// How long an open circuit stays open (milliseconds)
    pub reset_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Retry/backoff tuning for transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Backoff before the second attempt (milliseconds)
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff (milliseconds)
    pub max_delay_ms: u64,

    /// Retry-After values above this make a 429 non-retryable for the cycle
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            max_retry_after_secs: 30,
        }
    }
}

/// Version tracking and alerting
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChangeDetectionConfig {
    /// Versions kept per URL
    pub retention_count: usize,

    /// Minimum change percentage that triggers a notification
    pub notify_threshold_percent: f64,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        Self {
            retention_count: 10,
            notify_threshold_percent: 5.0,
        }
    }
}

/// Frontier scoring
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StrategyConfig {
    /// Base priority of discovered links
    pub base_priority: f64,

    /// Weight of the source page's quality score (0.0-1.0) in link priority
    pub quality_weight: f64,

    /// Priority subtracted per level of depth
    pub depth_penalty: f64,

    /// Quality at or above which a page's out-links may go deeper
    pub quality_threshold: f64,

    /// Extra depth granted below high-quality pages
    pub depth_bonus: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_priority: 10.0,
            quality_weight: 5.0,
            depth_penalty: 1.0,
            quality_threshold: 0.7,
            depth_bonus: 1,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// A monitored site with its seed URLs
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,

    /// List of seed URLs to start crawling from
    pub seeds: Vec<String>,

    /// Initial priority of the seeds (higher is crawled first)
    #[serde(default = "default_site_priority")]
    pub priority: f64,
}

fn default_site_priority() -> f64 {
    10.0
}
