use crate::UrlError;
use url::Url;

/// Extracts the lowercase host of a parsed URL
///
/// The host is the unit of rate limiting and circuit breaking. Ports are not
/// part of it.
///
/// # Arguments
///
/// * `url` - The parsed URL
///
/// # Returns
///
/// * `Some(String)` - Lowercase host
/// * `None` - The URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_tide::url::extract_domain;
///
/// let url = Url::parse("https://Docs.Example.COM:8443/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("docs.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a URL string and returns its domain
///
/// # Arguments
///
/// * `url_str` - The URL string to parse
///
/// # Returns
///
/// * `Ok(String)` - Lowercase host
/// * `Err(UrlError)` - Failed to parse, or the URL has no host
pub fn domain_of(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    extract_domain(&url).ok_or(UrlError::MissingDomain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ignores_port_and_case() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(extract_domain(&url), Some("127.0.0.1".to_string()));

        let url = Url::parse("https://Example.COM/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://blog.example.com/post").unwrap(),
            "blog.example.com"
        );
        assert!(matches!(domain_of("not a url"), Err(UrlError::Parse(_))));
        assert!(matches!(
            domain_of("mailto:someone@example.com"),
            Err(UrlError::MissingDomain)
        ));
    }
}
