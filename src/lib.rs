//! Termscout: a focused term-matching crawler
//!
//! This crate crawls a single allow-listed domain, extracts page text, matches it
//! against curated term lists, and stages matching pages for an external AI
//! classifier. Crawl and classification state is persisted so both halves
//! survive restarts and sustained rate limiting.

pub mod ai;
pub mod config;
pub mod crawler;
pub mod logging;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Termscout operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Classifier unavailable after {attempts} cooldown attempts")]
    ClassifierUnavailable { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns true for errors that must stop the process
    ///
    /// Persistence failures and an open classifier circuit terminate the run;
    /// everything else is handled at the item boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Io(_) | Self::ClassifierUnavailable { .. }
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Termscout operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{AiProcessingState, Frontier, FrontierSnapshot, UrlItem};
pub use url::{normalize_url, UrlFilter};
