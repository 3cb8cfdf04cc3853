//! HTML extraction: title, visible text and followable links
//!
//! Text is emitted one line per block element so that line-level change
//! detection sees paragraph boundaries.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements whose text never counts as page content
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Elements that start a new line of extracted text
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "td", "th", "tr", "pre", "blockquote",
    "section", "article", "header", "footer", "nav", "main", "aside", "dt", "dd", "figcaption",
    "body", "ul", "ol", "table", "form",
];

/// What the crawler keeps from an HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,
    /// Visible text, one block per line
    pub text: String,
    /// Absolute http(s) links in document order, without duplicates
    pub links: Vec<String>,
}

/// Parses an HTML document
///
/// # Link rules
///
/// Followed: `<a href>` and `<link rel="canonical">`, including `nofollow`.
/// Ignored: `download` anchors, fragment-only hrefs, and `javascript:`,
/// `mailto:`, `tel:` or `data:` targets.
///
/// # Example
///
/// ```
/// use sumi_tide::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><p>Hi</p><a href="/next">Next</a></body></html>"#;
/// let page = parse_html(html, &Url::parse("https://example.com/").unwrap());
/// assert_eq!(page.title.as_deref(), Some("Test"));
/// assert_eq!(page.links, vec!["https://example.com/next"]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        text: extract_text(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn extract_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut lines: Vec<String> = Vec::new();
    let mut current_block = None;

    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let words = collapse_whitespace(text);
        if words.is_empty() {
            continue;
        }

        let mut block = None;
        let mut skipped = false;
        for ancestor in node.ancestors() {
            let Some(element) = ancestor.value().as_element() else {
                continue;
            };
            if SKIPPED_ELEMENTS.contains(&element.name()) {
                skipped = true;
                break;
            }
            if block.is_none() && BLOCK_ELEMENTS.contains(&element.name()) {
                block = Some(ancestor.id());
            }
        }
        if skipped {
            continue;
        }

        match lines.last_mut() {
            Some(line) if block == current_block => {
                line.push(' ');
                line.push_str(&words);
            }
            _ => {
                lines.push(words);
                current_block = block;
            }
        }
    }

    lines.join("\n")
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |element: ElementRef<'_>| {
        if let Some(link) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url))
        {
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    };

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if element.value().attr("download").is_none() {
                push(element);
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            push(element);
        }
    }

    links
}

/// Resolves an href against the page URL; None for links that are not followed
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
