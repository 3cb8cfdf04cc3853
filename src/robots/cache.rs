//! Per-origin robots.txt cache with expiry
//!
//! Each origin holds a cell that is filled at most once, so concurrent
//! lookups for an uncached origin share a single fetch.

use crate::robots::RobotsRules;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Rules are refetched once they are older than this
pub const DEFAULT_ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CachedRules {
    rules: Arc<RobotsRules>,
    fetched_at: Instant,
}

/// Robots rules keyed by origin (`scheme://host[:port]`)
#[derive(Debug)]
pub struct RobotsCache {
    entries: DashMap<String, Arc<OnceCell<CachedRules>>>,
    ttl: Duration,
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fresh rules for an origin, if cached
    pub fn get(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        let entry = self.entries.get(origin)?;
        let cached = entry.value().get()?;
        if self.is_stale(cached) {
            return None;
        }
        Some(Arc::clone(&cached.rules))
    }

    /// Cached rules for `origin`, running `fetch` when there are none
    ///
    /// Callers arriving while a fetch is in progress wait for its result
    /// instead of starting their own.
    pub async fn get_or_fetch<F, Fut>(&self, origin: &str, fetch: F) -> Arc<RobotsRules>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RobotsRules>,
    {
        let cell = self.cell_for(origin);
        let cached = cell
            .get_or_init(|| async {
                CachedRules {
                    rules: Arc::new(fetch().await),
                    fetched_at: Instant::now(),
                }
            })
            .await;
        Arc::clone(&cached.rules)
    }

    /// Stores rules for an origin, replacing anything cached
    pub fn insert(&self, origin: impl Into<String>, rules: RobotsRules) -> Arc<RobotsRules> {
        let rules = Arc::new(rules);
        let cached = CachedRules {
            rules: Arc::clone(&rules),
            fetched_at: Instant::now(),
        };
        self.entries
            .insert(origin.into(), Arc::new(OnceCell::from(cached)));
        rules
    }

    /// The origin's cell; an expired one is swapped for an empty cell
    fn cell_for(&self, origin: &str) -> Arc<OnceCell<CachedRules>> {
        let mut entry = self.entries.entry(origin.to_string()).or_default();
        if entry.value().get().is_some_and(|cached| self.is_stale(cached)) {
            *entry.value_mut() = Arc::new(OnceCell::new());
        }
        Arc::clone(entry.value())
    }

    fn is_stale(&self, cached: &CachedRules) -> bool {
        cached.fetched_at.elapsed() > self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(DEFAULT_ROBOTS_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = RobotsCache::new(Duration::from_secs(60));
        cache.insert("https://example.com", RobotsRules::allow_all());
        assert!(cache.get("https://example.com").is_some());
        assert!(cache.get("https://other.com").is_none());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("https://example.com").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("https://example.com").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_rules_are_fetched_again() {
        let cache = RobotsCache::new(Duration::from_secs(60));
        let counter = std::cell::Cell::new(0);
        let fetches = &counter;
        let fetch = || async move {
            fetches.set(fetches.get() + 1);
            RobotsRules::allow_all()
        };

        cache.get_or_fetch("https://example.com", fetch).await;
        cache.get_or_fetch("https://example.com", fetch).await;
        assert_eq!(fetches.get(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_fetch("https://example.com", fetch).await;
        assert_eq!(fetches.get(), 2);
        assert!(cache.get("https://example.com").is_some());
    }
}
