use crate::config::{Config, FilterConfig};
use crate::url::matcher::{host_entry_matches, host_matches};
use std::path::Path;
use url::Url;

/// Host block-list entries. A trailing '.' marks a label prefix.
const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "catalog.",
    "cloudfront.net",
    "cdn.",
    "static.",
    "library.",
    "libguides.",
    "libanswers.",
    "calendar.",
    "gradcatalog.",
    "digitalcommons.",
    "archives.",
    "lib.",
];

/// Substrings checked against lowercase host+path and the query string
const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    "/events/month/",
    "/events/week/",
    "/events/day/",
    "/events/category/",
    "/events/",
    "/calendar/",
    "/calendar-of-events/",
    "outlook-ical=",
    "ical=",
    "vcalendar=",
    "eventdisplay=",
    "tribe-bar-date=",
    ".ics",
    "/feed/",
    "/rss/",
    "/atom/",
    "/news/tag",
    "/news/blog",
    "/blog/",
    "/directories/",
    "/directory/",
    "/special-collections/",
    "/exhibits/",
    "/resource/",
    "/senate-minutes",
    "/wp-admin",
];

/// Substrings checked against the path, query and host
const DEFAULT_BLOCKED_PATH_SEGMENTS: &[&str] = &[
    "/download_file",
    "/download.",
    "/download/",
    "/downloads/",
    "/services/download",
    ".ashx",
    "/file/",
    "/files/",
    "/getfile",
    "/get-file",
    "/serve-file",
    "/stream/",
    "/media/",
    "/assets/",
    "/cdn-cgi/",
];

/// Query parameter names or values containing any of these are blocked
const DEFAULT_BLOCKED_PARAMS: &[&str] = &["file", "download", "attachment", "doc", "document", "pdf"];

const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
    // Documents
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "rtf", "csv", "xml", "json", "ashx",
    // Media
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "mp3", "mp4", "wav", "avi", "mov", "wmv",
    "webm", "ogg", "flv", "mkv", "m4v", "m4a",
    // Web assets
    "css", "js", "map", "woff", "woff2", "ttf", "eot", "less", "scss", "sass",
    // Archives
    "zip", "rar", "tar", "gz", "7z", "bz2", "iso",
    // Other
    "exe", "dll", "bin", "dat", "log", "bak", "tmp", "cache", "swf",
];

/// Reason a URL was kept out of the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Malformed,
    UnsupportedScheme,
    OutsideAllowedDomain,
    BlockedHost,
    BlockedExtension,
    BlockedPattern,
    BlockedPathSegment,
    BlockedParam,
}

impl Exclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnsupportedScheme => "unsupported scheme",
            Self::OutsideAllowedDomain => "outside allowed domain",
            Self::BlockedHost => "blocked host",
            Self::BlockedExtension => "blocked extension",
            Self::BlockedPattern => "blocked pattern",
            Self::BlockedPathSegment => "blocked path segment",
            Self::BlockedParam => "blocked query parameter",
        }
    }
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission predicate over URLs
///
/// Deterministic and free of I/O: the same URL always gets the same answer.
/// All list entries are stored lowercase.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    allowed_domain: String,
    hosts: Vec<String>,
    extensions: Vec<String>,
    patterns: Vec<String>,
    path_segments: Vec<String>,
    params: Vec<String>,
}

impl UrlFilter {
    /// Builds a filter for `allowed_domain` from the `[filters]` section
    pub fn new(allowed_domain: &str, filters: &FilterConfig) -> Self {
        fn merge(defaults: &[&str], extra: &[String], use_defaults: bool) -> Vec<String> {
            let base = if use_defaults { defaults } else { &[] };
            base.iter()
                .map(|s| s.to_string())
                .chain(extra.iter().cloned())
                .map(|s| s.to_lowercase())
                .collect()
        }

        let domain = allowed_domain.trim().to_lowercase();
        let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
        let use_defaults = filters.use_defaults;

        Self {
            allowed_domain: domain,
            hosts: merge(DEFAULT_BLOCKED_HOSTS, &filters.blocked_hosts, use_defaults),
            extensions: merge(
                DEFAULT_BLOCKED_EXTENSIONS,
                &filters.blocked_extensions,
                use_defaults,
            )
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .collect(),
            patterns: merge(DEFAULT_BLOCKED_PATTERNS, &filters.blocked_patterns, use_defaults),
            path_segments: merge(
                DEFAULT_BLOCKED_PATH_SEGMENTS,
                &filters.blocked_path_segments,
                use_defaults,
            ),
            params: merge(DEFAULT_BLOCKED_PARAMS, &filters.blocked_params, use_defaults),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.crawler.allowed_domain, &config.filters)
    }

    pub fn allowed_domain(&self) -> &str {
        &self.allowed_domain
    }

    /// Returns true if the URL must not enter the frontier
    ///
    /// Malformed URLs are excluded.
    pub fn is_excluded(&self, url: &str) -> bool {
        self.exclusion(url).is_some()
    }

    /// Runs the ordered checks and returns the first one that fired
    pub fn exclusion(&self, url: &str) -> Option<Exclusion> {
        match Url::parse(url) {
            Ok(parsed) => self.exclusion_for(&parsed),
            Err(_) => Some(Exclusion::Malformed),
        }
    }

    pub fn exclusion_for(&self, url: &Url) -> Option<Exclusion> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Some(Exclusion::UnsupportedScheme);
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_lowercase(),
            _ => return Some(Exclusion::Malformed),
        };

        if !host_matches(&host, &self.allowed_domain) {
            return Some(Exclusion::OutsideAllowedDomain);
        }

        if self.hosts.iter().any(|entry| host_entry_matches(&host, entry)) {
            return Some(Exclusion::BlockedHost);
        }

        let path = url.path().to_lowercase();
        if let Some(ext) = Path::new(&path).extension().and_then(|e| e.to_str()) {
            if self.extensions.iter().any(|blocked| blocked == ext) {
                return Some(Exclusion::BlockedExtension);
            }
        }

        let host_path = format!("{}{}", host, path);
        let query = url
            .query()
            .map(|q| format!("?{}", q.to_lowercase()))
            .unwrap_or_default();

        if self
            .patterns
            .iter()
            .any(|p| host_path.contains(p.as_str()) || query.contains(p.as_str()))
        {
            return Some(Exclusion::BlockedPattern);
        }

        if self.path_segments.iter().any(|p| {
            path.contains(p.as_str()) || query.contains(p.as_str()) || host.contains(p.as_str())
        }) {
            return Some(Exclusion::BlockedPathSegment);
        }

        for (key, value) in url.query_pairs() {
            let key = key.to_lowercase();
            let value = value.to_lowercase();
            if self
                .params
                .iter()
                .any(|p| key.contains(p.as_str()) || value.contains(p.as_str()))
            {
                return Some(Exclusion::BlockedParam);
            }
        }

        None
    }
}
