use crate::UrlError;
use url::Url;

/// Query parameters that never change page content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "mc_cid", "_ga", "yclid"];

/// Normalizes a URL into the key used by the visited set and version history
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host
/// 3. Collapse duplicate slashes and dot segments; drop a trailing slash
///    except on the root path
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest
///
/// The scheme and port are preserved so the normalized URL stays fetchable.
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse, or the scheme is not HTTP(S)
///
/// # Examples
///
/// ```
/// use sumi_tide::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.com/a/./b/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .map(str::to_lowercase)
        .ok_or(UrlError::MissingDomain)?;
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Convenience wrapper returning the normalized URL as a `String`
pub fn normalize_url_str(url_str: &str) -> Result<String, UrlError> {
    normalize_url(url_str).map(String::from)
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
