//! Persistence writer
//!
//! Resolves the history collection through the registry once, then writes
//! one or many records to it. Errors are returned to the caller; deciding whether
//! they reach the user is up to the tracked collection.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::HistoryResult;
use crate::storage::HistoryBackend;

use super::collection::{HistoryCollection, HistorySchema};
use super::entry::AuditRecord;
use super::registry::CollectionRegistry;

/// Writes history records for one tracked collection
pub struct HistoryWriter {
    registry: Arc<CollectionRegistry>,
    backend: Arc<dyn HistoryBackend>,
    collection: String,
    schema: HistorySchema,
    resolved: OnceCell<Arc<HistoryCollection>>,
}

impl HistoryWriter {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        backend: Arc<dyn HistoryBackend>,
        collection: impl Into<String>,
        schema: HistorySchema,
    ) -> Self {
        Self {
            registry,
            backend,
            collection: collection.into(),
            schema,
            resolved: OnceCell::new(),
        }
    }

    /// Name of the history collection
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Handle on the history collection, created on first use
    ///
    /// The registry is consulted until a lookup succeeds; after that the
    /// handle is served without touching the registry lock.
    pub async fn collection(&self) -> HistoryResult<Arc<HistoryCollection>> {
        self.resolved
            .get_or_try_init(|| {
                self.registry.get_or_create(
                    self.backend.clone(),
                    &self.collection,
                    self.schema.clone(),
                )
            })
            .await
            .cloned()
    }

    /// Persist one record
    pub async fn write_one(&self, record: AuditRecord) -> HistoryResult<AuditRecord> {
        let stored = self.collection().await?.insert_one(record).await?;
        tracing::debug!(
            collection = %self.collection,
            record = %stored.format_human_readable(),
            "history record written"
        );
        Ok(stored)
    }

    /// Persist a batch of records in one call; returns how many were written
    ///
    /// An empty batch makes no backend call.
    pub async fn write_many(&self, records: Vec<AuditRecord>) -> HistoryResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let stored = self.collection().await?.insert_many(records).await?;
        tracing::debug!(
            collection = %self.collection,
            count = stored.len(),
            "history records written"
        );
        Ok(stored.len())
    }
}
