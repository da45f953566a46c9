//! Persisted queue of term-matched pages awaiting classification

use crate::crawler::TermMatch;
use crate::output::MatchRecorder;
use crate::storage::{read_json, write_json_atomic, StorageResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lifecycle of a queued page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// A page waiting for the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiQueueItem {
    pub url: String,
    #[serde(rename = "content", default)]
    pub extracted_text: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Staging time in milliseconds since the Unix epoch
    #[serde(rename = "added", default)]
    pub added_at: i64,
    #[serde(rename = "terms", default)]
    pub matched_terms: Vec<TermMatch>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub retry_count: u32,
}

impl AiQueueItem {
    pub fn new(
        url: impl Into<String>,
        extracted_text: impl Into<String>,
        title: Option<String>,
        matched_terms: Vec<TermMatch>,
    ) -> Self {
        Self {
            url: url.into(),
            extracted_text: extracted_text.into(),
            title,
            added_at: Utc::now().timestamp_millis(),
            matched_terms,
            status: ItemStatus::Pending,
            retry_count: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }
}

/// The `ai_queue.json` file
///
/// Staging (crawler side) and rewriting (classifier side) go through the same
/// lock, so running both in one process never loses an item.
#[derive(Debug)]
pub struct AiQueueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AiQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Reads the queue; a missing file is an empty queue
    pub async fn load(&self) -> StorageResult<Vec<AiQueueItem>> {
        let _guard = self.lock.lock().await;
        read_queue(&self.path)
    }

    /// Adds a page unless it is already queued or already confirmed
    ///
    /// Returns true if the item was written.
    pub async fn stage(&self, item: AiQueueItem, recorder: &MatchRecorder) -> StorageResult<bool> {
        let _guard = self.lock.lock().await;

        let mut queue = read_queue(&self.path)?;
        if queue.iter().any(|existing| existing.url == item.url) {
            debug!("Already in AI queue: {}", item.url);
            return Ok(false);
        }

        if recorder.contains(&item.url)? {
            debug!("Already confirmed, not staging: {}", item.url);
            return Ok(false);
        }

        info!(
            "Added to AI queue: {} with {} terms",
            item.url,
            item.matched_terms.len()
        );
        queue.push(item);
        write_json_atomic(&self.path, &queue)?;
        Ok(true)
    }

    /// Writes `remaining` back, keeping items staged since `known` was read
    ///
    /// `known` holds every URL the caller has already seen in the file. Items
    /// in the file that are not in `known` were staged in the meantime; they are
    /// appended to `remaining` and added to `known`.
    pub async fn save_merged(
        &self,
        remaining: &mut Vec<AiQueueItem>,
        known: &mut HashSet<String>,
    ) -> StorageResult<()> {
        let _guard = self.lock.lock().await;

        let on_disk = read_queue(&self.path)?;
        let mut added = 0;
        for item in on_disk {
            if known.insert(item.url.clone()) {
                remaining.push(item);
                added += 1;
            }
        }
        if added > 0 {
            debug!("Merged {} newly staged items into the AI queue", added);
        }

        write_json_atomic(&self.path, remaining)
    }
}

fn read_queue(path: &Path) -> StorageResult<Vec<AiQueueItem>> {
    Ok(read_json(path)?.unwrap_or_default())
}
