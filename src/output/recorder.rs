//! Append-only log of classifier-confirmed matches

use crate::crawler::TermMatch;
use crate::storage::{read_json, write_json_atomic, StatePaths, StorageError, StorageResult};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::info;

const CSV_HEADER: [&str; 7] = [
    "Date",
    "Time",
    "URL",
    "Title",
    "Matched Terms",
    "AI Analysis",
    "Timestamp",
];

/// Index of the URL column in the CSV log
const URL_COLUMN: usize = 2;

/// A page the classifier confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "terms", default)]
    pub matched_terms: Vec<TermMatch>,
    /// Classifier response text
    #[serde(rename = "aiAnalysis")]
    pub verdict: String,
    pub timestamp: DateTime<Utc>,
}

impl MatchRecord {
    /// Distinct matched terms joined with `; `
    fn terms_column(&self) -> String {
        let mut terms: Vec<&str> = Vec::new();
        for m in &self.matched_terms {
            if !terms.contains(&m.term.as_str()) {
                terms.push(&m.term);
            }
        }
        terms.join("; ")
    }
}

/// Writes confirmed matches to a CSV log and a JSON array
///
/// Existing rows are never changed; new records are only ever appended.
#[derive(Debug, Clone)]
pub struct MatchRecorder {
    csv_path: PathBuf,
    json_path: PathBuf,
}

impl MatchRecorder {
    pub fn new(paths: &StatePaths) -> Self {
        Self::with_paths(paths.matches_csv(), paths.matches_json())
    }

    pub fn with_paths(csv_path: impl Into<PathBuf>, json_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            json_path: json_path.into(),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Appends one record to both logs
    pub fn record(&self, record: &MatchRecord) -> StorageResult<()> {
        self.append_csv(record)?;

        let mut records: Vec<MatchRecord> = read_json(&self.json_path)?.unwrap_or_default();
        records.push(record.clone());
        write_json_atomic(&self.json_path, &records)?;

        info!(
            target: "termscout::matches",
            url = %record.url,
            title = record.title.as_deref().unwrap_or("No Title"),
            terms = %record.terms_column(),
            "Match confirmed"
        );
        Ok(())
    }

    /// True if the CSV log already has a row for `url`
    pub fn contains(&self, url: &str) -> StorageResult<bool> {
        if !self.csv_path.exists() {
            return Ok(false);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.csv_path)?;

        for row in reader.records() {
            if row?.get(URL_COLUMN) == Some(url) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of data rows in the CSV log
    pub fn count(&self) -> StorageResult<usize> {
        if !self.csv_path.exists() {
            return Ok(0);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.csv_path)?;

        let mut count = 0;
        for row in reader.records() {
            row?;
            count += 1;
        }
        Ok(count)
    }

    fn append_csv(&self, record: &MatchRecord) -> StorageResult<()> {
        if let Some(parent) = self.csv_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .map_err(|e| StorageError::Io {
                path: self.csv_path.clone(),
                source: e,
            })?;
        let is_new = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| StorageError::Io {
                path: self.csv_path.clone(),
                source: e,
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(CSV_HEADER)?;
        }

        let local = record.timestamp.with_timezone(&Local);
        let analysis = record.verdict.split_whitespace().collect::<Vec<_>>().join(" ");
        writer.write_record([
            local.format("%Y-%m-%d").to_string(),
            local.format("%H:%M:%S").to_string(),
            record.url.clone(),
            record.title.clone().unwrap_or_else(|| "No Title".to_string()),
            record.terms_column(),
            analysis,
            record.timestamp.to_rfc3339(),
        ])?;

        writer.flush().map_err(|e| StorageError::Io {
            path: self.csv_path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
