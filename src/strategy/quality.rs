use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text length at which the length component saturates
const FULL_TEXT_LENGTH: f64 = 2_000.0;

/// Links per thousand characters at which the density component reaches zero
const MAX_LINK_DENSITY: f64 = 50.0;

/// Feedback about a processed page, keyed by URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Quality in 0.0..=1.0
    pub quality: f64,
    pub title: Option<String>,
    pub text_length: usize,
    pub outbound_links: usize,
    /// Deepest depth this page's out-links may be queued at
    pub depth_limit: u32,
    pub last_crawled: Option<DateTime<Utc>>,
}

impl PageMetadata {
    pub fn new(depth_limit: u32) -> Self {
        Self {
            quality: 0.0,
            title: None,
            text_length: 0,
            outbound_links: 0,
            depth_limit,
            last_crawled: None,
        }
    }
}

/// Scores a page from its text length and outbound link density
///
/// Long pages score higher; pages that are mostly links score lower.
pub fn quality_score(text_length: usize, outbound_links: usize) -> f64 {
    let length = (text_length as f64 / FULL_TEXT_LENGTH).min(1.0);

    let density = if outbound_links == 0 {
        0.5
    } else {
        let per_thousand = outbound_links as f64 * 1_000.0 / text_length.max(1) as f64;
        (1.0 - per_thousand / MAX_LINK_DENSITY).clamp(0.0, 1.0)
    };

    (0.7 * length + 0.3 * density).clamp(0.0, 1.0)
}
