//! Storage module for persisting crawl and classification state
//!
//! Everything lives under one directory per allowed domain:
//!
//! ```text
//! state/crawler-state.json     frontier snapshot
//! state/ai_queue.json          AI queue
//! state/ai-state.json          AI processing state
//! logs/system.log, logs/error.log
//! logs/ai/system.log, logs/ai/error.log
//! logs/ai/matches/ai_matches.csv, logs/ai/matches/ai_matches.json
//! ```

mod error;
mod json;

pub use error::{StorageError, StorageResult};
pub use json::{read_json, write_json_atomic};

use crate::config::Config;
use std::path::{Path, PathBuf};

/// Paths of every persisted file for one domain
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(domain_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: domain_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.domain_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn frontier(&self) -> PathBuf {
        self.state_dir().join("crawler-state.json")
    }

    pub fn ai_queue(&self) -> PathBuf {
        self.state_dir().join("ai_queue.json")
    }

    pub fn ai_state(&self) -> PathBuf {
        self.state_dir().join("ai-state.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ai_log_dir(&self) -> PathBuf {
        self.log_dir().join("ai")
    }

    pub fn matches_dir(&self) -> PathBuf {
        self.ai_log_dir().join("matches")
    }

    pub fn matches_csv(&self) -> PathBuf {
        self.matches_dir().join("ai_matches.csv")
    }

    pub fn matches_json(&self) -> PathBuf {
        self.matches_dir().join("ai_matches.json")
    }

    /// Creates the state and log directories
    pub fn ensure_dirs(&self) -> StorageResult<()> {
        for dir in [self.state_dir(), self.matches_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| StorageError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
