use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use termscout::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.EDU/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.edu".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Estimates the crawl depth of a URL whose discovery depth was lost
///
/// Counts non-empty path segments, so `/` is 0 and `/a/b` is 2.
/// Unparseable input counts as depth 0.
pub fn path_depth(url: &str) -> u32 {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .map(|segments| segments.filter(|s| !s.is_empty()).count() as u32)
        })
        .unwrap_or(0)
}
