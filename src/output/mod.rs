//! Output module for confirmed matches and statistics
//!
//! This module handles:
//! - Recording classifier-confirmed matches (CSV and JSON logs)
//! - Reading statistics back from the persisted snapshots

mod recorder;
pub mod stats;

pub use recorder::{MatchRecord, MatchRecorder};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
