//! Batch scheduling over the shared frontier
//!
//! Concurrent page tasks never touch the frontier directly; every admit,
//! dispatch, complete and fail goes through the scheduler's mutex, so the
//! frontier's invariants hold no matter how tasks interleave.

use crate::state::{Frontier, FrontierCounts, UrlItem};
use crate::storage::StorageResult;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Owns the frontier and decides when to snapshot it
pub struct Scheduler {
    frontier: Arc<Mutex<Frontier>>,
    batch_size: usize,
    snapshot_path: PathBuf,
    persist_interval: Duration,
    last_persist: Mutex<Instant>,
}

impl Scheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `frontier` - Restored or empty frontier
    /// * `batch_size` - Concurrency ceiling; one batch never exceeds it
    /// * `snapshot_path` - Where `persist` writes the frontier
    /// * `persist_interval` - Minimum spacing of periodic snapshots
    pub fn new(
        frontier: Frontier,
        batch_size: usize,
        snapshot_path: impl Into<PathBuf>,
        persist_interval: Duration,
    ) -> Self {
        Self {
            frontier: Arc::new(Mutex::new(frontier)),
            batch_size: batch_size.max(1),
            snapshot_path: snapshot_path.into(),
            persist_interval,
            last_persist: Mutex::new(Instant::now()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dispatches the next batch, lowest depth first
    pub async fn next_batch(&self) -> Vec<UrlItem> {
        self.frontier.lock().await.dispatch(self.batch_size)
    }

    /// Admits every link at `depth`, returning how many were queued
    pub async fn admit_all(&self, links: &[String], depth: u32) -> usize {
        let mut frontier = self.frontier.lock().await;
        links.iter().filter(|link| frontier.admit(link, depth)).count()
    }

    pub async fn complete(&self, url: &str) {
        self.frontier.lock().await.complete(url);
    }

    /// Releases `url` without marking it visited
    pub async fn fail(&self, url: &str) {
        self.frontier.lock().await.fail(url);
    }

    pub async fn is_visited(&self, url: &str) -> bool {
        self.frontier.lock().await.is_visited(url)
    }

    pub async fn counts(&self) -> FrontierCounts {
        self.frontier.lock().await.counts()
    }

    /// Snapshots the frontier if the persist interval has elapsed
    ///
    /// Returns true if a snapshot was written.
    pub async fn persist_if_due(&self) -> StorageResult<bool> {
        let mut last = self.last_persist.lock().await;
        if last.elapsed() < self.persist_interval {
            return Ok(false);
        }

        self.frontier.lock().await.persist(&self.snapshot_path)?;
        *last = Instant::now();
        Ok(true)
    }

    /// Snapshots the frontier unconditionally
    pub async fn persist(&self) -> StorageResult<()> {
        let mut last = self.last_persist.lock().await;
        self.frontier.lock().await.persist(&self.snapshot_path)?;
        *last = Instant::now();
        debug!("Frontier snapshot written to {}", self.snapshot_path.display());
        Ok(())
    }
}
