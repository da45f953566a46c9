//! Crawl frontier: queued, in-progress and visited URLs
//!
//! The frontier is the only mutable structure shared by concurrent page tasks.
//! It is not internally synchronized; the scheduler owns it behind a mutex.

use crate::config::CrawlerConfig;
use crate::storage::{read_json, write_json_atomic, StorageResult};
use crate::url::{normalize_url, path_depth, UrlFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::{debug, info, warn};

/// A URL waiting in (or dispatched from) the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlItem {
    pub url: String,
    pub depth: u32,
    /// Discovery time in milliseconds since the Unix epoch
    #[serde(rename = "added", default)]
    pub enqueued_at: i64,
}

impl UrlItem {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
            enqueued_at: Utc::now().timestamp_millis(),
        }
    }
}

/// On-disk form of the frontier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub queue: Vec<UrlItem>,
    #[serde(rename = "inProgress", default)]
    pub in_progress: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl FrontierSnapshot {
    /// Loads a snapshot without building a frontier (read-only observers)
    pub fn load(path: &Path) -> StorageResult<Option<Self>> {
        read_json(path)
    }
}

/// Size limits applied by the frontier
#[derive(Debug, Clone, Copy)]
pub struct FrontierLimits {
    pub max_depth: u32,
    pub max_visited: usize,
    pub eviction_batch: usize,
}

impl FrontierLimits {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_visited: config.max_visited,
            eviction_batch: config.visited_eviction_batch,
        }
    }
}

/// Current set sizes, for progress logs and statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub visited: usize,
    pub queued: usize,
    pub in_progress: usize,
}

/// Queue, visited and in-progress bookkeeping for one crawl
///
/// Invariants:
/// - a URL is in at most one of queue, in-progress and visited
/// - the queue is ordered by (depth, discovery sequence)
/// - visited holds at most `max_visited` entries after any operation
#[derive(Debug)]
pub struct Frontier {
    filter: UrlFilter,
    limits: FrontierLimits,
    queue: BTreeMap<(u32, u64), UrlItem>,
    queued: HashMap<String, (u32, u64)>,
    visited_order: VecDeque<String>,
    visited: HashSet<String>,
    in_progress: HashMap<String, UrlItem>,
    next_seq: u64,
}

impl Frontier {
    pub fn new(filter: UrlFilter, limits: FrontierLimits) -> Self {
        Self {
            filter,
            limits,
            queue: BTreeMap::new(),
            queued: HashMap::new(),
            visited_order: VecDeque::new(),
            visited: HashSet::new(),
            in_progress: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Normalizes, filters and enqueues a discovered URL
    ///
    /// Returns true if the URL was inserted. Malformed, filtered, too-deep and
    /// already-known URLs are dropped without error.
    pub fn admit(&mut self, url: &str, depth: u32) -> bool {
        if depth > self.limits.max_depth {
            debug!("Not admitting {} at depth {} (max {})", url, depth, self.limits.max_depth);
            return false;
        }

        let normalized = match normalize_url(url) {
            Ok(u) => u,
            Err(e) => {
                debug!("Not admitting {}: {}", url, e);
                return false;
            }
        };

        if let Some(reason) = self.filter.exclusion_for(&normalized) {
            debug!("Not admitting {}: {}", normalized, reason);
            return false;
        }

        let key = normalized.to_string();
        if self.is_known(&key) {
            return false;
        }

        self.enqueue(UrlItem::new(key, depth));
        true
    }

    /// Removes up to `n` items from the front of the queue and marks them in-progress
    pub fn dispatch(&mut self, n: usize) -> Vec<UrlItem> {
        let mut batch = Vec::with_capacity(n.min(self.queue.len()));

        while batch.len() < n {
            let Some((_, item)) = self.queue.pop_first() else {
                break;
            };
            self.queued.remove(&item.url);
            self.in_progress.insert(item.url.clone(), item.clone());
            batch.push(item);
        }

        batch
    }

    /// Marks a URL as visited and releases it from in-progress
    pub fn complete(&mut self, url: &str) {
        let key = Self::key(url);
        self.in_progress.remove(&key);

        if let Some(pos) = self.queued.remove(&key) {
            self.queue.remove(&pos);
        }

        if self.visited.insert(key.clone()) {
            self.visited_order.push_back(key);
            self.evict_if_needed();
        }
    }

    /// Releases a URL from in-progress without marking it visited
    ///
    /// The URL may be admitted again when it is rediscovered.
    pub fn fail(&mut self, url: &str) {
        self.in_progress.remove(&Self::key(url));
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&Self::key(url))
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn counts(&self) -> FrontierCounts {
        FrontierCounts {
            visited: self.visited.len(),
            queued: self.queue.len(),
            in_progress: self.in_progress.len(),
        }
    }

    /// Captures the full state, queue in dispatch order
    pub fn snapshot(&self) -> FrontierSnapshot {
        let mut in_progress: Vec<String> = self.in_progress.keys().cloned().collect();
        in_progress.sort();

        FrontierSnapshot {
            visited: self.visited_order.iter().cloned().collect(),
            queue: self.queue.values().cloned().collect(),
            in_progress,
            timestamp: Utc::now(),
        }
    }

    /// Writes the snapshot with write-temp-then-rename
    pub fn persist(&self, path: &Path) -> StorageResult<()> {
        let snapshot = self.snapshot();
        write_json_atomic(path, &snapshot)?;
        debug!(
            "Persisted frontier: {} visited, {} queued, {} in progress",
            snapshot.visited.len(),
            snapshot.queue.len(),
            snapshot.in_progress.len()
        );
        Ok(())
    }

    /// Rebuilds a frontier from a snapshot
    ///
    /// Queue entries are re-sorted by depth (stable), duplicates and visited
    /// entries are dropped, and every in-progress URL goes back into the queue
    /// with its depth estimated from the path. Recovered URLs skip the filter.
    pub fn from_snapshot(
        snapshot: FrontierSnapshot,
        filter: UrlFilter,
        limits: FrontierLimits,
    ) -> Self {
        let mut frontier = Self::new(filter, limits);

        for url in snapshot.visited {
            if frontier.visited.insert(url.clone()) {
                frontier.visited_order.push_back(url);
            }
        }
        frontier.evict_if_needed();

        let mut queue = snapshot.queue;
        queue.sort_by_key(|item| item.depth);
        for item in queue {
            if !frontier.is_known(&item.url) {
                frontier.enqueue(item);
            }
        }

        let mut recovered = 0;
        for url in snapshot.in_progress {
            if frontier.is_known(&url) {
                continue;
            }
            let depth = path_depth(&url).min(limits.max_depth);
            frontier.enqueue(UrlItem::new(url, depth));
            recovered += 1;
        }

        if recovered > 0 {
            info!("Re-queued {} URLs that were in progress at the last snapshot", recovered);
        }

        frontier
    }

    /// Loads the snapshot at `path`, or starts empty if it is missing or unreadable
    pub fn restore(path: &Path, filter: UrlFilter, limits: FrontierLimits) -> Self {
        match read_json::<FrontierSnapshot>(path) {
            Ok(Some(snapshot)) => {
                info!(
                    "Restoring frontier from {} ({} visited, {} queued, {} in progress)",
                    path.display(),
                    snapshot.visited.len(),
                    snapshot.queue.len(),
                    snapshot.in_progress.len()
                );
                Self::from_snapshot(snapshot, filter, limits)
            }
            Ok(None) => {
                info!("No frontier snapshot at {}, starting empty", path.display());
                Self::new(filter, limits)
            }
            Err(e) if e.is_corrupt() => {
                warn!("Frontier snapshot is corrupt, starting empty: {}", e);
                Self::new(filter, limits)
            }
            Err(e) => {
                warn!("Ignoring unreadable frontier snapshot: {}", e);
                Self::new(filter, limits)
            }
        }
    }

    fn is_known(&self, url: &str) -> bool {
        self.visited.contains(url) || self.queued.contains_key(url) || self.in_progress.contains_key(url)
    }

    fn enqueue(&mut self, item: UrlItem) {
        let pos = (item.depth, self.next_seq);
        self.next_seq += 1;
        self.queued.insert(item.url.clone(), pos);
        self.queue.insert(pos, item);
    }

    fn evict_if_needed(&mut self) {
        if self.visited.len() <= self.limits.max_visited {
            return;
        }

        // Drop a whole batch, and enough extra to get back under the cap
        let overflow = self.visited.len() - self.limits.max_visited;
        let count = self.limits.eviction_batch.max(overflow).min(self.visited_order.len());
        for url in self.visited_order.drain(..count) {
            self.visited.remove(&url);
        }
        debug!("Evicted {} oldest visited URLs", count);
    }

    fn key(url: &str) -> String {
        normalize_url(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string())
    }
}
