//! Link and title extraction from fetched HTML

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Title and outbound links of a page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Trimmed text of the first non-empty `<title>`
    pub title: Option<String>,

    /// Absolute http(s) links in document order, without duplicates
    pub links: Vec<String>,
}

/// Parses HTML and collects the title and the `<a href>` targets
///
/// Relative links resolve against `<base href>` when present, otherwise
/// against `page_url`. Anchors with a `download` attribute, fragment-only
/// links and non-http(s) targets are skipped.
///
/// # Example
///
/// ```
/// use termscout::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let page_url = Url::parse("https://example.edu/").unwrap();
/// let parsed = parse_html(html, &page_url);
/// assert_eq!(parsed.title.as_deref(), Some("Test"));
/// assert_eq!(parsed.links, vec!["https://example.edu/page".to_string()]);
/// ```
pub fn parse_html(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, &base),
    }
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return page_url.clone();
    };

    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|s| !s.is_empty())
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter(|el| el.value().attr("download").is_none())
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_link(href, base))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Resolves an href to an absolute http(s) URL
fn resolve_link(href: &str, base: &Url) -> Option<String> {
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

    let absolute = base.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}
