//! Robots.txt policy collaborator
//!
//! The crawl engine asks a [`RobotsPolicy`] before fetching a URL.
//! [`RobotsTxtPolicy`] fetches `/robots.txt` per origin through the same
//! [`Fetcher`] used for pages and caches the rules. A robots file that is
//! missing, unreadable or answers with an error allows everything.

mod cache;
mod rules;

pub use cache::{RobotsCache, DEFAULT_ROBOTS_TTL};
pub use rules::RobotsRules;

use crate::crawler::Fetcher;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Decides whether a URL may be fetched
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    async fn is_allowed(&self, url: &str) -> bool;
}

/// Policy that never blocks a URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl RobotsPolicy for AllowAll {
    async fn is_allowed(&self, _url: &str) -> bool {
        true
    }
}

/// robots.txt-backed policy
pub struct RobotsTxtPolicy {
    fetcher: Arc<dyn Fetcher>,
    user_agent: String,
    cache: RobotsCache,
}

impl RobotsTxtPolicy {
    /// `user_agent` is the product token matched against `User-agent` lines
    pub fn new(fetcher: Arc<dyn Fetcher>, user_agent: impl Into<String>) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
            cache: RobotsCache::default(),
        }
    }

    pub fn with_cache(mut self, cache: RobotsCache) -> Self {
        self.cache = cache;
        self
    }

    /// Rules for the URL's origin, fetching them when not cached
    ///
    /// Concurrent calls for the same origin share one robots.txt request.
    pub async fn rules_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        self.cache
            .get_or_fetch(&origin, || self.fetch_rules(&origin))
            .await
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);
        match self.fetcher.fetch(&robots_url).await {
            Ok(response) if (200..300).contains(&response.status_code) => {
                RobotsRules::from_content(response.text())
            }
            Ok(response) => {
                tracing::debug!(
                    "{} answered HTTP {}, allowing all",
                    robots_url,
                    response.status_code
                );
                RobotsRules::allow_all()
            }
            Err(e) => {
                tracing::debug!("Could not fetch {}: {}, allowing all", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl RobotsPolicy for RobotsTxtPolicy {
    async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        let allowed = self.rules_for(&parsed).await.is_allowed(url, &self.user_agent);
        if !allowed {
            tracing::debug!("robots.txt disallows {}", url);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FetchResponse;
    use crate::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticFetcher {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                url: url.to_string(),
                status_code: self.status,
                body: self.body.as_bytes().to_vec(),
                content_type: Some("text/plain".to_string()),
                retry_after: None,
                elapsed: Duration::ZERO,
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse, FetchError> {
            Err(FetchError::Network("refused".to_string()))
        }
    }

    fn fetcher(status: u16, body: &'static str) -> Arc<StaticFetcher> {
        Arc::new(StaticFetcher {
            status,
            body,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_disallowed_paths_are_blocked() {
        let fetcher = fetcher(200, "User-agent: *\nDisallow: /admin\n");
        let policy = RobotsTxtPolicy::new(fetcher.clone(), "TideBot");

        assert!(policy.is_allowed("https://example.com/page").await);
        assert!(!policy.is_allowed("https://example.com/admin/users").await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_origins_are_cached_separately() {
        let fetcher = fetcher(200, "User-agent: *\nAllow: /\n");
        let policy = RobotsTxtPolicy::new(fetcher.clone(), "TideBot");

        policy.is_allowed("https://a.example.com/").await;
        policy.is_allowed("https://a.example.com/other").await;
        policy.is_allowed("https://b.example.com/").await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_or_failing_robots_allow_all() {
        let missing = RobotsTxtPolicy::new(fetcher(404, "Disallow: /"), "TideBot");
        assert!(missing.is_allowed("https://example.com/page").await);

        let erroring = RobotsTxtPolicy::new(fetcher(503, "User-agent: *\nDisallow: /"), "TideBot");
        assert!(erroring.is_allowed("https://example.com/page").await);

        let failing = RobotsTxtPolicy::new(Arc::new(FailingFetcher), "TideBot");
        assert!(failing.is_allowed("https://example.com/page").await);
    }

    struct SlowFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(FetchResponse {
                url: url.to_string(),
                status_code: 200,
                body: b"User-agent: *\nDisallow: /private\n".to_vec(),
                content_type: Some("text/plain".to_string()),
                retry_after: None,
                elapsed: Duration::from_millis(200),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_fetch() {
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
        });
        let policy = RobotsTxtPolicy::new(fetcher.clone(), "TideBot");

        let urls: Vec<String> = (0..8)
            .map(|i| format!("https://example.com/page/{}", i))
            .collect();
        let answers =
            futures::future::join_all(urls.iter().map(|url| policy.is_allowed(url))).await;

        assert!(answers.into_iter().all(|allowed| allowed));
        assert!(!policy.is_allowed("https://example.com/private/x").await);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_allow_all_policy() {
        assert!(AllowAll.is_allowed("https://example.com/anything").await);
    }
}
