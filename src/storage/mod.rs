//! Storage layer for doc-history
//!
//! Two seams separate the capture pipeline from concrete stores:
//!
//! - `DocumentStore`: the primary store whose mutations are audited.
//! - `HistoryBackend`: where history records are written. It may be the
//!   same store as the primary one or a different connection entirely.
//!
//! `MemoryStore` implements both; `JsonlBackend` keeps one append-only
//! JSON-lines file per history collection.

pub mod file_io;
pub mod jsonl;
pub mod memory;

pub use file_io::{read_json, write_json_atomic, write_lines_atomic};
pub use jsonl::{JsonlBackend, JsonlLog};
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::audit::entry::AuditRecord;
use crate::error::HistoryResult;
use crate::models::{
    DeleteOutcome, Document, Filter, FindAndModify, IndexSpec, Update, UpdateOutcome,
};

/// The primary document store
///
/// Every call is one round-trip. Implementations report how many documents
/// a mutation touched so the capture pipeline can tell a no-op apart from
/// a real change.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identity of the connection
    fn name(&self) -> &str;

    /// Fetch the first document matching the filter
    async fn find_one(&self, collection: &str, filter: &Filter) -> HistoryResult<Option<Document>>;

    /// Fetch every document matching the filter, in insertion order
    async fn find(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<Document>>;

    /// Insert a document and return its persisted form
    async fn insert_one(&self, collection: &str, doc: Document) -> HistoryResult<Document>;

    /// Update the first document matching the filter
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome>;

    /// Update every document matching the filter
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome>;

    /// Delete the first document matching the filter
    async fn delete_one(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome>;

    /// Delete every document matching the filter
    async fn delete_many(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome>;

    /// Update the first matching document and return it as requested
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> HistoryResult<Option<Document>>;

    /// Delete the first matching document and return it
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> HistoryResult<Option<Document>>;
}

/// Where history records are persisted
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Identity of the connection, part of the registry key
    fn connection_name(&self) -> &str;

    /// Create the collection if needed and register its indexes
    async fn prepare_collection(&self, collection: &str, indexes: &[IndexSpec]) -> HistoryResult<()>;

    /// Names of the indexes registered on a collection
    async fn index_names(&self, collection: &str) -> HistoryResult<Vec<String>>;

    /// Append one record
    async fn append(&self, collection: &str, record: &AuditRecord) -> HistoryResult<()>;

    /// Append a batch of records in one call
    async fn append_many(&self, collection: &str, records: &[AuditRecord]) -> HistoryResult<()>;

    /// Records matching the filter, in insertion order
    async fn records(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<AuditRecord>>;

    /// Overwrite a stored record in place; returns whether it was found
    async fn replace_record(&self, collection: &str, record: &AuditRecord) -> HistoryResult<bool>;

    /// Remove every record of a collection; returns how many were removed
    async fn clear_collection(&self, collection: &str) -> HistoryResult<u64>;
}

/// Check a record against a filter over its stored form
pub(crate) fn record_matches(record: &AuditRecord, filter: &Filter) -> HistoryResult<bool> {
    if filter.predicates().is_empty() {
        return Ok(true);
    }
    Ok(filter.matches(&record.to_document()?))
}
