//! Declarative history settings
//!
//! The serializable part of a tracked collection's configuration: naming,
//! diff mode, indexes and strictness. Code-only options (backends,
//! comparators, derivation functions) live on `HistoryOptions`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::models::IndexSpec;
use crate::storage::file_io::{read_json, write_json_atomic};

/// Default suffix appended to the primary collection name
pub const DEFAULT_SUFFIX: &str = "_history";

/// Serializable history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Use this history collection name instead of `<primary><suffix>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_collection_name: Option<String>,

    /// Suffix appended to the primary collection name
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Record only changed fields on update
    #[serde(default)]
    pub diff_only: bool,

    /// Indexes built on the history collection at creation
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,

    /// Surface audit failures to the caller of the mutation
    #[serde(default)]
    pub strict: bool,
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            custom_collection_name: None,
            suffix: default_suffix(),
            diff_only: false,
            indexes: Vec::new(),
            strict: false,
        }
    }
}

impl HistorySettings {
    /// Load settings from a JSON file, or defaults if the file doesn't exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        read_json(path).map_err(|e| {
            HistoryError::Config(format!(
                "Failed to load history settings from {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save settings to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HistoryError> {
        write_json_atomic(path, self)
    }

    /// Name of the history collection for a primary collection
    pub fn history_collection_name(&self, primary: &str) -> String {
        match &self.custom_collection_name {
            Some(name) => name.clone(),
            None => format!("{}{}", primary, self.suffix),
        }
    }
}
