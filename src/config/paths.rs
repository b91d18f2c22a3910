//! Path management for file-backed history collections
//!
//! ## Path Resolution Order
//!
//! 1. An explicit base directory (`HistoryPaths::with_base_dir`)
//! 2. `DOC_HISTORY_DATA_DIR` environment variable (if set)
//! 3. `./history` relative to the working directory

use std::path::PathBuf;

use crate::error::HistoryError;

/// Environment variable overriding the history directory
pub const DATA_DIR_ENV: &str = "DOC_HISTORY_DATA_DIR";

const DEFAULT_DIR: &str = "history";

/// Manages all paths used by the file-backed history backend
#[derive(Debug, Clone)]
pub struct HistoryPaths {
    /// Directory holding one log file per history collection
    base_dir: PathBuf,
}

impl HistoryPaths {
    /// Resolve the history directory from the environment
    pub fn new() -> Self {
        let base_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DIR));
        Self { base_dir }
    }

    /// Create HistoryPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("history.json")
    }

    /// Get the path to a collection's record log (`<collection>.jsonl`)
    pub fn collection_log(&self, collection: &str) -> Result<PathBuf, HistoryError> {
        validate_collection_name(collection)?;
        Ok(self.base_dir.join(format!("{}.jsonl", collection)))
    }

    /// Get the path to a collection's index manifest
    pub fn index_manifest(&self, collection: &str) -> Result<PathBuf, HistoryError> {
        validate_collection_name(collection)?;
        Ok(self.base_dir.join(format!("{}.indexes.json", collection)))
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> Result<(), HistoryError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| HistoryError::Io(format!("Failed to create history directory: {}", e)))
    }
}

impl Default for HistoryPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject collection names that cannot be used as a file stem
fn validate_collection_name(collection: &str) -> Result<(), HistoryError> {
    let valid = !collection.is_empty()
        && collection != "."
        && collection != ".."
        && !collection.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(HistoryError::Validation(format!(
            "Invalid history collection name: {:?}",
            collection
        )))
    }
}
