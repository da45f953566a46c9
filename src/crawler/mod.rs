//! Crawler module for page loading and processing
//!
//! This module contains the core crawling logic, including:
//! - The browser collaborator and its HTTP implementation
//! - HTML parsing, link extraction and main-content extraction
//! - Term matching over extracted text
//! - Batch scheduling over the shared frontier
//! - Overall crawl coordination

mod coordinator;
mod extractor;
mod fetcher;
mod parser;
mod scheduler;
mod terms;

pub use coordinator::{Coordinator, CrawlSummary};
pub use extractor::{ContentExtractor, ExtractedContent, MainContentExtractor};
pub use fetcher::{
    build_http_client, Browser, BrowserSession, HttpBrowser, LoadConfig, NavigationError,
    PageResponse, RenderedPage,
};
pub use parser::{parse_html, ParsedPage};
pub use scheduler::Scheduler;
pub use terms::{TermMatch, TermMatcher};
