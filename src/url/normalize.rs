use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Normalizes a URL into the form used as the frontier's unique key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host and drop every leading `www.` label
/// 3. Drop the default port (the parser already does this for http/https)
/// 4. Normalize the path:
///    - Remove dot segments and empty segments
///    - Remove trailing slash (except for root /)
/// 5. Remove fragment
/// 6. Sort query parameters by key (stable for repeated keys) and
///    re-serialize them form-encoded; drop an empty query
///
/// The scheme is preserved, so `http://` and `https://` stay distinct.
/// Applying the function to its own output returns the same URL.
///
/// # Examples
///
/// ```
/// use termscout::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.EDU:443/page/?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.edu/page?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let mut host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    while let Some(rest) = host.strip_prefix("www.") {
        host = rest.to_string();
    }
    if host.is_empty() {
        return Err(UrlError::MissingDomain);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if params.is_empty() {
            url.set_query(None);
        } else {
            // sort_by is stable: repeated keys keep their relative order
            params.sort_by(|a, b| a.0.cmp(&b.0));
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
