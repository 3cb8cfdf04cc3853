//! Adaptive crawl strategy
//!
//! The strategy owns the frontier: a priority queue of [`FrontierEntry`]s
//! popped highest-priority first, FIFO among equals. Links are filtered
//! (allow-list, depth, already visited) when they are discovered, so the queue
//! only ever holds URLs that will be fetched.
//!
//! Processed pages report back through
//! [`update_page_metadata`](AdaptiveCrawlStrategy::update_page_metadata) and
//! [`adjust_depth_based_on_quality`](AdaptiveCrawlStrategy::adjust_depth_based_on_quality);
//! their quality raises the priority of their out-links and can allow those
//! links to go deeper than the configured maximum depth.

mod frontier;
mod quality;

pub use frontier::FrontierEntry;
pub use quality::{quality_score, PageMetadata};

use crate::config::StrategyConfig;
use crate::state::VisitedSet;
use crate::url::{domain_of, normalize_url_str, DomainAllowList};
use dashmap::DashMap;
use frontier::Frontier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, trace};

/// Persistable frontier and page feedback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    /// Queued entries in dispatch order
    pub frontier: Vec<FrontierEntry>,
    pub metadata: HashMap<String, PageMetadata>,
}

pub struct AdaptiveCrawlStrategy {
    frontier: Mutex<Frontier>,
    metadata: DashMap<String, PageMetadata>,
    /// Depth limit inherited by URLs that have not been processed yet
    depth_limits: DashMap<String, u32>,
    visited: RwLock<Arc<VisitedSet>>,
    allow_list: DomainAllowList,
    config: StrategyConfig,
    max_depth: u32,
}

impl AdaptiveCrawlStrategy {
    pub fn new(allow_list: DomainAllowList, max_depth: u32, config: StrategyConfig) -> Self {
        Self {
            frontier: Mutex::new(Frontier::default()),
            metadata: DashMap::new(),
            depth_limits: DashMap::new(),
            visited: RwLock::new(Arc::new(VisitedSet::new())),
            allow_list,
            config,
            max_depth,
        }
    }

    /// Starts a new crawl run with an empty visited set
    ///
    /// URLs still queued from a previous run are marked visited again.
    pub fn begin_run(&self) {
        let fresh = Arc::new(VisitedSet::new());
        for entry in self.lock_frontier().ordered() {
            fresh.insert(&entry.url);
        }
        *self.visited.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    /// The visited set of the current run
    pub fn visited(&self) -> Arc<VisitedSet> {
        Arc::clone(&self.visited.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Cheap discovery-time filter: valid http(s), allow-listed, not yet visited
    pub fn should_crawl(&self, url: &str) -> bool {
        let Ok(normalized) = normalize_url_str(url) else {
            return false;
        };
        self.permits_domain(&normalized) && !self.visited().contains(&normalized)
    }

    /// Queues a seed URL at depth 0
    pub fn add_seed(&self, url: &str, priority: f64) -> bool {
        let Some(normalized) = self.admit(url) else {
            return false;
        };
        self.depth_limits.entry(normalized.clone()).or_insert(self.max_depth);
        self.push(FrontierEntry::seed(normalized, priority));
        true
    }

    /// Queues a link found on `from` at the given depth
    ///
    /// Returns false when the link is filtered out or already visited.
    pub fn add_discovered(&self, url: &str, depth: u32, from: &str) -> bool {
        let limit = self.depth_limit_of(from);
        if depth > limit {
            trace!("Skipping {} at depth {} (limit {})", url, depth, limit);
            return false;
        }

        let Some(normalized) = self.admit(url) else {
            return false;
        };

        let priority = self.score(from, depth);
        self.depth_limits.entry(normalized.clone()).or_insert(limit);
        self.push(FrontierEntry {
            url: normalized,
            depth,
            priority,
            discovered_from: Some(from.to_string()),
        });
        true
    }

    /// Returns an entry to the frontier without the visited check
    ///
    /// Used when the pipeline had no room for a popped entry.
    pub fn requeue(&self, entry: FrontierEntry) {
        self.push(entry);
    }

    /// Pops the highest-priority entry
    pub fn get_next_url(&self) -> Option<FrontierEntry> {
        self.lock_frontier().pop()
    }

    pub fn len(&self) -> usize {
        self.lock_frontier().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores feedback for a processed page and re-scores its queued out-links
    ///
    /// The page's depth limit never shrinks through this call.
    pub fn update_page_metadata(&self, url: &str, mut metadata: PageMetadata) {
        metadata.depth_limit = metadata.depth_limit.max(self.depth_limit_of(url));
        self.metadata.insert(url.to_string(), metadata);

        let rescored = {
            let mut frontier = self.lock_frontier();
            frontier.rescore(|entry| {
                (entry.discovered_from.as_deref() == Some(url))
                    .then(|| self.score(url, entry.depth))
            })
        };
        if rescored > 0 {
            debug!("Re-scored {} queued links from {}", rescored, url);
        }
    }

    pub fn get_page_metadata(&self, url: &str) -> Option<PageMetadata> {
        self.metadata.get(url).map(|m| m.clone())
    }

    /// Extends the depth limit below pages that score highly
    ///
    /// Returns the depth limit that applies to the page's out-links.
    pub fn adjust_depth_based_on_quality(&self, url: &str, quality: f64) -> u32 {
        let inherited = self.depth_limit_of(url);
        let limit = if quality >= self.config.quality_threshold {
            inherited.max(self.max_depth + self.config.depth_bonus)
        } else {
            inherited
        };

        if limit > inherited {
            debug!(
                "Quality {:.2} of {} extends link depth to {}",
                quality, url, limit
            );
        }

        self.metadata
            .entry(url.to_string())
            .or_insert_with(|| PageMetadata::new(limit))
            .depth_limit = limit;
        self.depth_limits.insert(url.to_string(), limit);
        limit
    }

    /// Copies the frontier and metadata for persistence
    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            frontier: self.lock_frontier().ordered(),
            metadata: self
                .metadata
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Loads a snapshot; restored entries count as visited in the current run
    pub fn restore(&self, snapshot: StrategySnapshot) {
        for (url, metadata) in snapshot.metadata {
            self.depth_limits.insert(url.clone(), metadata.depth_limit);
            self.metadata.insert(url, metadata);
        }

        let visited = self.visited();
        for entry in snapshot.frontier {
            if visited.insert(&entry.url) {
                self.push(entry);
            }
        }
    }

    fn admit(&self, url: &str) -> Option<String> {
        let normalized = match normalize_url_str(url) {
            Ok(normalized) => normalized,
            Err(e) => {
                trace!("Skipping {}: {}", url, e);
                return None;
            }
        };

        if !self.permits_domain(&normalized) {
            trace!("Skipping {}: domain not allowed", normalized);
            return None;
        }

        self.visited().insert(&normalized).then_some(normalized)
    }

    fn permits_domain(&self, url: &str) -> bool {
        domain_of(url).map_or(false, |domain| self.allow_list.permits(&domain))
    }

    fn depth_limit_of(&self, url: &str) -> u32 {
        self.metadata
            .get(url)
            .map(|m| m.depth_limit)
            .or_else(|| self.depth_limits.get(url).map(|d| *d))
            .unwrap_or(self.max_depth)
    }

    fn score(&self, from: &str, depth: u32) -> f64 {
        let quality = self.metadata.get(from).map_or(0.0, |m| m.quality);
        self.config.base_priority + self.config.quality_weight * quality
            - self.config.depth_penalty * depth as f64
    }

    fn push(&self, entry: FrontierEntry) {
        self.lock_frontier().push(entry);
    }

    fn lock_frontier(&self) -> MutexGuard<'_, Frontier> {
        self.frontier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
