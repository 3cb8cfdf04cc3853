//! URL handling module for Sumi-Tide
//!
//! This module provides URL normalization, domain extraction, wildcard matching,
//! and the domain allow-list used to filter links at discovery time.

mod domain;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::{domain_of, extract_domain};
pub use matcher::matches_wildcard;
pub use normalize::{normalize_url, normalize_url_str};

/// Where a domain sits relative to the configured allow-list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainScope {
    /// Domain matches an allow-listed site pattern
    Internal,
    /// Domain is outside every configured site
    External,
}

/// Allow-list of domain patterns consulted before a URL is queued
#[derive(Debug, Clone, Default)]
pub struct DomainAllowList {
    patterns: Vec<String>,
    allow_external: bool,
}

impl DomainAllowList {
    /// Builds an allow-list from `example.com` / `*.example.com` patterns
    pub fn new(patterns: Vec<String>, allow_external: bool) -> Self {
        let patterns = patterns.into_iter().map(|p| p.to_lowercase()).collect();
        Self {
            patterns,
            allow_external,
        }
    }

    /// Classifies a domain against the allow-list
    ///
    /// # Arguments
    ///
    /// * `domain` - Lowercase domain to classify
    ///
    /// # Returns
    ///
    /// * `DomainScope::Internal` - Some pattern matches the domain
    /// * `DomainScope::External` - No pattern matches
    pub fn scope(&self, domain: &str) -> DomainScope {
        if self.patterns.iter().any(|p| matches_wildcard(p, domain)) {
            DomainScope::Internal
        } else {
            DomainScope::External
        }
    }

    /// Returns true if links to this domain may be queued
    ///
    /// An empty allow-list admits every domain.
    pub fn permits(&self, domain: &str) -> bool {
        self.patterns.is_empty()
            || self.allow_external
            || self.scope(domain) == DomainScope::Internal
    }
}
