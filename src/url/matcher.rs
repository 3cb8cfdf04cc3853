/// Checks if a domain matches an allow-list pattern
///
/// `"example.com"` matches only itself. `"*.example.com"` matches the bare
/// domain and any subdomain depth below it.
///
/// # Arguments
///
/// * `pattern` - Lowercase allow-list pattern
/// * `candidate` - Lowercase domain to check
///
/// # Returns
///
/// * `true` if the candidate matches the pattern
///
/// # Examples
///
/// ```
/// use sumi_tide::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "badexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
        assert!(!matches_wildcard("blog.example.com", "example.com"));
    }

    #[test]
    fn test_wildcard_pattern() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "blog.example.com"));
        assert!(matches_wildcard("*.example.com", "deep.nested.example.com"));
    }

    #[test]
    fn test_wildcard_requires_label_boundary() {
        assert!(!matches_wildcard("*.example.com", "notexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.evil.org"));
    }
}
