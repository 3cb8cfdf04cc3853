//! Parsed robots.txt rules

use robotstxt::DefaultMatcher;

/// Robots.txt body for one origin
///
/// Matching is delegated to the `robotstxt` crate; the body is kept as text
/// and evaluated on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Rules that allow every URL
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    pub fn is_allow_all(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Checks an absolute URL against the rules for `user_agent`
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.is_allow_all() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }
}
