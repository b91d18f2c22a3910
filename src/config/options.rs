//! Full configuration of a tracked collection

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::audit::diff::{DiffComparator, DiffMode, StructuralComparator};
use crate::audit::enrich::{DerivationRule, MetadataField};
use crate::audit::entry::RECORD_FIELDS;
use crate::error::HistoryError;
use crate::models::IndexSpec;
use crate::storage::HistoryBackend;

use super::settings::HistorySettings;

/// Everything a tracked collection needs to know about its history
///
/// ```rust,ignore
/// let options = HistoryOptions::new()
///     .diff_only(true)
///     .index(IndexSpec::ascending("t").then("d._id", 1))
///     .metadata("title", DerivationRule::field("title"))
///     .comparator(UnorderedSetComparator::new(["tags"]));
/// ```
#[derive(Clone, Default)]
pub struct HistoryOptions {
    settings: HistorySettings,
    history_backend: Option<Arc<dyn HistoryBackend>>,
    comparator: Option<Arc<dyn DiffComparator>>,
    metadata: Vec<MetadataField>,
}

impl HistoryOptions {
    /// Default options: `<primary>_history`, full snapshots, lenient
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from loaded settings
    pub fn from_settings(settings: HistorySettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Override the history collection name
    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.settings.custom_collection_name = Some(name.into());
        self
    }

    /// Change the suffix appended to the primary collection name
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.settings.suffix = suffix.into();
        self
    }

    /// Record only changed fields on update
    pub fn diff_only(mut self, enabled: bool) -> Self {
        self.settings.diff_only = enabled;
        self
    }

    /// Surface audit failures to the caller of the mutation
    pub fn strict(mut self, enabled: bool) -> Self {
        self.settings.strict = enabled;
        self
    }

    /// Build an index on the history collection
    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.settings.indexes.push(spec);
        self
    }

    /// Attach a derived metadata field to every record
    pub fn metadata(mut self, name: impl Into<String>, rule: DerivationRule) -> Self {
        self.metadata.push(MetadataField::new(name, rule));
        self
    }

    /// Replace the default structural comparison
    pub fn comparator(mut self, comparator: impl DiffComparator + 'static) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Write history to another store than the primary one
    pub fn history_backend(mut self, backend: Arc<dyn HistoryBackend>) -> Self {
        self.history_backend = Some(backend);
        self
    }

    /// Get the declarative settings
    pub fn settings(&self) -> &HistorySettings {
        &self.settings
    }

    /// Get the declared metadata fields
    pub fn metadata_fields(&self) -> &[MetadataField] {
        &self.metadata
    }

    /// Get the secondary history backend, if any
    pub fn backend(&self) -> Option<&Arc<dyn HistoryBackend>> {
        self.history_backend.as_ref()
    }

    /// Get the comparator used in change-set mode
    pub fn diff_comparator(&self) -> Arc<dyn DiffComparator> {
        self.comparator
            .clone()
            .unwrap_or_else(|| Arc::new(StructuralComparator))
    }

    /// Get the payload mode for updates
    pub fn diff_mode(&self) -> DiffMode {
        if self.settings.diff_only {
            DiffMode::ChangesOnly
        } else {
            DiffMode::Full
        }
    }

    /// Check whether audit failures are surfaced
    pub fn is_strict(&self) -> bool {
        self.settings.strict
    }

    /// Name of the history collection for a primary collection
    pub fn history_collection_name(&self, primary: &str) -> String {
        self.settings.history_collection_name(primary)
    }

    /// Check the options before a collection is tracked
    ///
    /// Metadata names must be unique and must not shadow the record fields.
    pub fn validate(&self) -> Result<(), HistoryError> {
        if self.settings.custom_collection_name.is_none() && self.settings.suffix.is_empty() {
            return Err(HistoryError::Config(
                "History suffix cannot be empty without a custom collection name".into(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.metadata {
            if field.name.is_empty() {
                return Err(HistoryError::Config("Metadata field name cannot be empty".into()));
            }
            if RECORD_FIELDS.contains(&field.name.as_str()) {
                return Err(HistoryError::Config(format!(
                    "Metadata field '{}' collides with a record field",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(HistoryError::Config(format!(
                    "Metadata field '{}' is declared twice",
                    field.name
                )));
            }
        }

        for spec in &self.settings.indexes {
            if spec.keys.is_empty() {
                return Err(HistoryError::Config("Index must have at least one key".into()));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for HistoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryOptions")
            .field("settings", &self.settings)
            .field(
                "history_backend",
                &self.history_backend.as_ref().map(|b| b.connection_name().to_string()),
            )
            .field("custom_comparator", &self.comparator.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}
