//! URL handling module for Termscout
//!
//! This module provides URL normalization, host matching, path-depth estimation
//! and the admission filter that keeps the crawl inside its allowed domain.

mod domain;
mod filter;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::{extract_domain, path_depth};
pub use filter::{Exclusion, UrlFilter};
pub use matcher::{host_entry_matches, host_matches};
pub use normalize::normalize_url;
