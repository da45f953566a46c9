//! Statistics read from the persisted snapshots
//!
//! Nothing here writes; it is safe to run while a crawl or the AI pipeline
//! is active against the same domain directory.

use crate::ai::{AiQueueItem, ItemStatus};
use crate::output::MatchRecorder;
use crate::state::{AiProcessingState, FrontierSnapshot};
use crate::storage::{read_json, StatePaths, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Crawl and classification statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistics {
    pub visited: usize,
    pub queued: usize,
    pub in_progress: usize,

    /// Queued URLs per depth
    pub queue_by_depth: BTreeMap<u32, usize>,

    /// When the frontier snapshot was written, if one exists
    pub snapshot_at: Option<DateTime<Utc>>,

    /// AI queue items awaiting classification
    pub ai_pending: usize,

    /// AI queue items marked failed but not yet removed
    pub ai_failed_in_queue: usize,

    pub processed: usize,
    pub failed: usize,
    pub last_processed: Option<String>,

    /// Rows in the match log
    pub matches: usize,
}

/// Loads statistics for one domain directory
pub fn load_statistics(paths: &StatePaths) -> StorageResult<CrawlStatistics> {
    let mut stats = CrawlStatistics::default();

    if let Some(snapshot) = FrontierSnapshot::load(&paths.frontier())? {
        stats.visited = snapshot.visited.len();
        stats.queued = snapshot.queue.len();
        stats.in_progress = snapshot.in_progress.len();
        stats.snapshot_at = Some(snapshot.timestamp);
        for item in &snapshot.queue {
            *stats.queue_by_depth.entry(item.depth).or_insert(0) += 1;
        }
    }

    let queue: Vec<AiQueueItem> = read_json(&paths.ai_queue())?.unwrap_or_default();
    stats.ai_pending = queue.iter().filter(|i| i.status == ItemStatus::Pending).count();
    stats.ai_failed_in_queue = queue.iter().filter(|i| i.status == ItemStatus::Failed).count();

    let ai_state = AiProcessingState::load(&paths.ai_state());
    stats.processed = ai_state.processed_count();
    stats.failed = ai_state.failed_count();
    stats.last_processed = ai_state.last_processed.clone();

    stats.matches = MatchRecorder::new(paths).count()?;

    Ok(stats)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Frontier:");
    println!("  Visited: {}", stats.visited);
    println!("  Queued: {}", stats.queued);
    println!("  In progress: {}", stats.in_progress);
    match stats.snapshot_at {
        Some(at) => {
            let age = Utc::now().signed_duration_since(at);
            println!(
                "  Snapshot: {} ({}s ago)",
                at.to_rfc3339(),
                age.num_seconds().max(0)
            );
        }
        None => println!("  Snapshot: none"),
    }
    println!();

    if !stats.queue_by_depth.is_empty() {
        println!("Queue by Depth:");
        for (depth, count) in &stats.queue_by_depth {
            println!("  {}: {}", depth, count);
        }
        println!();
    }

    println!("AI Analysis:");
    println!("  Pending: {}", stats.ai_pending);
    if stats.ai_failed_in_queue > 0 {
        println!("  Failed (still queued): {}", stats.ai_failed_in_queue);
    }
    println!("  Processed: {}", stats.processed);
    println!("  Failed: {}", stats.failed);
    if let Some(url) = &stats.last_processed {
        println!("  Last processed: {}", url);
    }
    println!();

    let hit_rate = if stats.processed > 0 {
        (stats.matches as f64 / stats.processed as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Confirmed Matches: {} ({:.1}% of processed pages)",
        stats.matches, hit_rate
    );
}
