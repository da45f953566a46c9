use crate::config::types::{AiConfig, Config, CrawlerConfig, FilterConfig, HostOverride, TermCategory};
use crate::url::host_matches;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_ai_config(&config.ai)?;
    validate_filters(&config.filters)?;
    validate_host_overrides(&config.host_overrides)?;
    validate_terms(&config.terms)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_domain_string(&config.allowed_domain)?;

    let start = Url::parse(&config.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start-url '{}': {}", config.start_url, e))
    })?;

    if start.scheme() != "http" && start.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "start-url '{}' must use http or https",
            config.start_url
        )));
    }

    let host = start.host_str().unwrap_or_default().to_lowercase();
    if !host_matches(&host, &config.allowed_domain.to_lowercase()) {
        return Err(ConfigError::Validation(format!(
            "start-url host '{}' is outside allowed-domain '{}'",
            host, config.allowed_domain
        )));
    }

    if config.max_concurrent < 1 || config.max_concurrent > 64 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be between 1 and 64, got {}",
            config.max_concurrent
        )));
    }

    if config.max_visited == 0 {
        return Err(ConfigError::Validation(
            "max-visited must be >= 1".to_string(),
        ));
    }

    if config.visited_eviction_batch == 0 || config.visited_eviction_batch > config.max_visited {
        return Err(ConfigError::Validation(format!(
            "visited-eviction-batch must be between 1 and max-visited ({}), got {}",
            config.max_visited, config.visited_eviction_batch
        )));
    }

    if config.page_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "page-timeout-ms must be >= 100ms, got {}ms",
            config.page_timeout_ms
        )));
    }

    Ok(())
}

/// Validates AI pipeline configuration
fn validate_ai_config(config: &AiConfig) -> Result<(), ConfigError> {
    Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid ai endpoint: {}", e)))?;

    if config.model.is_empty() {
        return Err(ConfigError::Validation("ai model cannot be empty".to_string()));
    }

    if config.rate_limit_threshold < 1 {
        return Err(ConfigError::Validation(
            "rate-limit-threshold must be >= 1".to_string(),
        ));
    }

    if config.max_queue_retries < 1 {
        return Err(ConfigError::Validation(
            "max-queue-retries must be >= 1".to_string(),
        ));
    }

    if config.max_cooldown_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-cooldown-attempts must be >= 1".to_string(),
        ));
    }

    if config.cooldown_max_secs < config.cooldown_base_secs {
        return Err(ConfigError::Validation(format!(
            "cooldown-max-secs ({}) must be >= cooldown-base-secs ({})",
            config.cooldown_max_secs, config.cooldown_base_secs
        )));
    }

    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-max-ms ({}) must be >= backoff-base-ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }

    if config.content_limit == 0 {
        return Err(ConfigError::Validation(
            "content-limit must be >= 1".to_string(),
        ));
    }

    if config.positive_marker.trim().is_empty() {
        return Err(ConfigError::Validation(
            "positive-marker cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates user-supplied block-list entries
fn validate_filters(config: &FilterConfig) -> Result<(), ConfigError> {
    for host in &config.blocked_hosts {
        validate_host_pattern(host)?;
    }

    for ext in &config.blocked_extensions {
        if ext.is_empty() || ext.contains('/') {
            return Err(ConfigError::InvalidPattern(format!(
                "Invalid blocked extension '{}'",
                ext
            )));
        }
    }

    let lists = [
        &config.blocked_patterns,
        &config.blocked_path_segments,
        &config.blocked_params,
    ];
    if lists.iter().any(|list| list.iter().any(|p| p.is_empty())) {
        return Err(ConfigError::InvalidPattern(
            "Block-list entries cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_host_overrides(overrides: &[HostOverride]) -> Result<(), ConfigError> {
    for entry in overrides {
        validate_domain_string(&entry.host)?;

        if let Some(timeout) = entry.timeout_ms {
            if timeout < 100 {
                return Err(ConfigError::Validation(format!(
                    "host-override '{}' timeout-ms must be >= 100ms, got {}ms",
                    entry.host, timeout
                )));
            }
        }
    }
    Ok(())
}

fn validate_terms(categories: &[TermCategory]) -> Result<(), ConfigError> {
    if categories.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[terms]] category is required".to_string(),
        ));
    }

    for category in categories {
        if category.category.is_empty() {
            return Err(ConfigError::Validation(
                "Term category name cannot be empty".to_string(),
            ));
        }

        if category.terms.is_empty() || category.terms.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "Term category '{}' must list at least one non-empty term",
                category.category
            )));
        }
    }

    Ok(())
}

/// Validates a host block-list entry: a full host or a label prefix ending in '.'
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    if let Some(label) = pattern.strip_suffix('.') {
        if label.is_empty()
            || !label
                .chars()
                .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
        {
            return Err(ConfigError::InvalidPattern(format!(
                "Host prefix '{}' contains invalid characters",
                pattern
            )));
        }
        return Ok(());
    }

    validate_domain_string(pattern)
}

/// Validates a domain string
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // e.g. example.edu, not just "example"
    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.edu')",
            domain
        )));
    }

    Ok(())
}
