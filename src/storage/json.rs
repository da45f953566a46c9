//! JSON snapshot files with crash-safe replacement

use crate::storage::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Reads and decodes a JSON file
///
/// A missing file is `Ok(None)`; an unreadable or undecodable one is an error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let contents = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|source| StorageError::Serialization {
            path: path.to_path_buf(),
            source,
        })
}

/// Serializes `value` and replaces `path` atomically
///
/// The data goes to a sibling `.tmp` file which is synced and then renamed
/// over the target, so readers see either the old snapshot or the new one.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
    }

    let encoded = serde_json::to_vec_pretty(value).map_err(|source| {
        StorageError::Serialization {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path).map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(&encoded)
        .map_err(|e| StorageError::io(&temp_path, e))?;
    file.sync_all().map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| StorageError::io(path, e))?;
    Ok(())
}
