/// Checks if a host equals a domain or is one of its subdomains
///
/// Both sides are expected to be lowercase already.
///
/// # Examples
///
/// ```
/// use termscout::url::host_matches;
///
/// assert!(host_matches("example.edu", "example.edu"));
/// assert!(host_matches("news.example.edu", "example.edu"));
/// assert!(!host_matches("notexample.edu", "example.edu"));
/// ```
pub fn host_matches(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

/// Checks a host against one host block-list entry
///
/// An entry ending in `.` is a label prefix (`calendar.` blocks
/// `calendar.example.edu`); any other entry blocks that host and its subdomains.
pub fn host_entry_matches(host: &str, entry: &str) -> bool {
    if entry.ends_with('.') {
        host.starts_with(entry) && host.len() > entry.len()
    } else {
        host_matches(host, entry)
    }
}
