//! Content version tracking and change classification
//!
//! [`ContentChangeDetector`] keeps a bounded, ordered history of
//! [`PageVersion`]s per URL (newest last) and classifies each new capture
//! against the latest one. Persistence is external: the detector only offers
//! [`load_history`](ContentChangeDetector::load_history) and
//! [`export_history`](ContentChangeDetector::export_history).

mod diff;
mod version;

pub use diff::LineDiff;
pub use version::{content_hash, ChangeResult, ChangeType, PageVersion};

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Smallest percentage reported for a capture whose hash changed
const MIN_MODIFICATION_PERCENT: f64 = 0.1;

pub struct ContentChangeDetector {
    histories: DashMap<String, VecDeque<PageVersion>>,
    retention_count: usize,
}

impl ContentChangeDetector {
    pub fn new(retention_count: usize) -> Self {
        Self {
            histories: DashMap::new(),
            retention_count: retention_count.max(1),
        }
    }

    pub fn retention_count(&self) -> usize {
        self.retention_count
    }

    /// Records a capture and classifies it against the previous version
    pub fn track_page_version(&self, url: &str, raw_content: &str, text_content: &str) -> ChangeResult {
        self.track_page_version_with_metadata(url, raw_content, text_content, BTreeMap::new())
    }

    /// Like [`track_page_version`](Self::track_page_version), with page metadata
    pub fn track_page_version_with_metadata(
        &self,
        url: &str,
        raw_content: &str,
        text_content: &str,
        metadata: BTreeMap<String, String>,
    ) -> ChangeResult {
        let version = PageVersion::new(url, raw_content, text_content, metadata);

        let mut history = self.histories.entry(url.to_string()).or_default();
        let result = match history.back() {
            None => ChangeResult::addition(),
            Some(previous) => classify(previous, &version),
        };

        history.push_back(version);
        while history.len() > self.retention_count {
            history.pop_front();
        }

        tracing::debug!(
            "{} change for {} ({:.1}%)",
            result.change_type,
            url,
            result.change_percentage
        );
        result
    }

    /// Stored versions for a URL, oldest first
    pub fn get_version_history(&self, url: &str) -> Vec<PageVersion> {
        self.histories
            .get(url)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_latest_version(&self, url: &str) -> Option<PageVersion> {
        self.histories
            .get(url)
            .and_then(|history| history.back().cloned())
    }

    /// URLs with at least one stored version, sorted
    pub fn tracked_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.histories.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    /// Total stored versions across all URLs
    pub fn version_count(&self) -> usize {
        self.histories.iter().map(|e| e.value().len()).sum()
    }

    /// Replaces the history of every URL present in `histories`
    ///
    /// Versions are sorted by capture time and trimmed to the retention count.
    pub fn load_history(&self, histories: HashMap<String, Vec<PageVersion>>) {
        for (url, mut versions) in histories {
            versions.sort_by_key(|v| v.captured_at);
            let skip = versions.len().saturating_sub(self.retention_count);
            let history: VecDeque<PageVersion> = versions.into_iter().skip(skip).collect();
            if !history.is_empty() {
                self.histories.insert(url, history);
            }
        }
    }

    /// Copies every URL's history, oldest first
    pub fn export_history(&self) -> HashMap<String, Vec<PageVersion>> {
        self.histories
            .iter()
            .map(|e| (e.key().clone(), e.value().iter().cloned().collect()))
            .collect()
    }
}

fn classify(previous: &PageVersion, current: &PageVersion) -> ChangeResult {
    if current.is_empty() && !previous.is_empty() {
        return ChangeResult::removal();
    }
    if current.content_hash == previous.content_hash {
        return ChangeResult::unchanged();
    }

    let mut sections = BTreeMap::new();
    let text_diff = LineDiff::between(&previous.text_content, &current.text_content);

    let percentage = if text_diff.is_empty() {
        sections.insert("markup".to_string(), "markup changed, text unchanged".to_string());
        LineDiff::between(&previous.raw_content, &current.raw_content).percentage()
    } else {
        sections.insert("text".to_string(), text_diff.summary());
        text_diff.percentage()
    };

    if previous.title() != current.title() {
        sections.insert(
            "title".to_string(),
            format!(
                "{} -> {}",
                previous.title().unwrap_or(""),
                current.title().unwrap_or("")
            ),
        );
    }

    ChangeResult {
        has_changes: true,
        change_type: ChangeType::Modification,
        change_percentage: percentage.max(MIN_MODIFICATION_PERCENT),
        changed_sections: sections,
    }
}
