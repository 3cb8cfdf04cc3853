use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// One immutable capture of a URL's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageVersion {
    pub url: String,
    /// SHA-256 over raw and text content, hex encoded
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub raw_content: String,
    pub text_content: String,
    /// Extracted page attributes such as `title` and `content_type`
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PageVersion {
    pub fn new(
        url: impl Into<String>,
        raw_content: impl Into<String>,
        text_content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let raw_content = raw_content.into();
        let text_content = text_content.into();
        Self {
            url: url.into(),
            content_hash: content_hash(&raw_content, &text_content),
            captured_at: Utc::now(),
            raw_content,
            text_content,
            metadata,
        }
    }

    /// True when the capture carries no content at all
    pub fn is_empty(&self) -> bool {
        self.raw_content.trim().is_empty() && self.text_content.trim().is_empty()
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

/// Hashes raw and text content together
pub fn content_hash(raw_content: &str, text_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_content.as_bytes());
    hasher.update([0u8]);
    hasher.update(text_content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Classification of a capture relative to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    None,
    Addition,
    Removal,
    Modification,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Addition => "addition",
            Self::Removal => "removal",
            Self::Modification => "modification",
        };
        f.write_str(name)
    }
}

/// Outcome of comparing a capture with the latest stored version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    pub has_changes: bool,
    pub change_type: ChangeType,
    /// Share of content that differs, 0.0..=100.0
    pub change_percentage: f64,
    /// Short per-section descriptions, keyed `text`, `markup` or `title`
    pub changed_sections: BTreeMap<String, String>,
}

impl ChangeResult {
    pub fn unchanged() -> Self {
        Self {
            has_changes: false,
            change_type: ChangeType::None,
            change_percentage: 0.0,
            changed_sections: BTreeMap::new(),
        }
    }

    pub fn addition() -> Self {
        Self {
            has_changes: true,
            change_type: ChangeType::Addition,
            change_percentage: 100.0,
            changed_sections: BTreeMap::new(),
        }
    }

    pub fn removal() -> Self {
        Self {
            has_changes: true,
            change_type: ChangeType::Removal,
            change_percentage: 100.0,
            changed_sections: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_covers_both_contents() {
        assert_eq!(content_hash("<p>a</p>", "a"), content_hash("<p>a</p>", "a"));
        assert_ne!(content_hash("<p>a</p>", "a"), content_hash("<p>a</p>", "b"));
        assert_ne!(content_hash("ab", ""), content_hash("a", "b"));
        assert_eq!(content_hash("", "").len(), 64);
    }

    #[test]
    fn test_empty_version() {
        let version = PageVersion::new("https://example.com/", "  ", "\n", BTreeMap::new());
        assert!(version.is_empty());
        assert!(version.title().is_none());
    }
}
