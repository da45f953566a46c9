//! State module for tracking crawl and classification progress
//!
//! # Components
//!
//! - `Frontier`: queued, in-progress and visited URLs with snapshot persistence
//! - `AiProcessingState`: URLs the classifier has already processed or given up on

mod ai_state;
mod frontier;

// Re-export main types
pub use ai_state::AiProcessingState;
pub use frontier::{Frontier, FrontierCounts, FrontierLimits, FrontierSnapshot, UrlItem};
