//! Configuration module for Termscout
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use termscout::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("termscout.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AiConfig, Config, CrawlerConfig, FilterConfig, HostOverride, OutputConfig, TermCategory,
    WaitStrategy,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, resolve_api_key,
};
