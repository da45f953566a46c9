use crate::storage::{read_json, write_json_atomic, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Which URLs the classifier has already handled
///
/// A URL listed in `processed` is never sent to the classifier again, even if
/// it is still present in the queue file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiProcessingState {
    #[serde(default)]
    processed: Vec<String>,
    #[serde(default)]
    failed: Vec<String>,
    /// Set before each classifier call so a restart resumes at the same item
    #[serde(rename = "lastProcessed", default)]
    pub last_processed: Option<String>,
    #[serde(skip)]
    processed_index: HashSet<String>,
    #[serde(skip)]
    failed_index: HashSet<String>,
}

impl AiProcessingState {
    /// Loads the state file; a missing or unreadable file yields an empty state
    pub fn load(path: &Path) -> Self {
        match read_json::<Self>(path) {
            Ok(Some(mut state)) => {
                state.rebuild_index();
                state
            }
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Ignoring unreadable AI state: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_json_atomic(path, self)
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.processed_index.contains(url)
    }

    pub fn is_failed(&self, url: &str) -> bool {
        self.failed_index.contains(url)
    }

    pub fn mark_processed(&mut self, url: &str) {
        if self.processed_index.insert(url.to_string()) {
            self.processed.push(url.to_string());
        }
    }

    pub fn mark_failed(&mut self, url: &str) {
        if self.failed_index.insert(url.to_string()) {
            self.failed.push(url.to_string());
        }
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    fn rebuild_index(&mut self) {
        let mut processed = HashSet::new();
        self.processed.retain(|url| processed.insert(url.clone()));
        self.processed_index = processed;

        let mut failed = HashSet::new();
        self.failed.retain(|url| failed.insert(url.clone()));
        self.failed_index = failed;
    }
}
