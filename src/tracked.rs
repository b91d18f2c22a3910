//! Tracked collections
//!
//! A `TrackedCollection` wraps a collection of the primary store and
//! records a history entry for every mutation made through it. Each
//! operation runs as a fixed sequence of awaited stages:
//!
//! 1. capture the prior state, when the operation needs it
//! 2. run the primary mutation
//! 3. capture the resulting state, when the store did not return it
//! 4. build, enrich and persist the history record(s)
//!
//! The primary mutation's result is returned to the caller whatever
//! happens in stages 3 and 4, unless the collection is strict.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::audit::{
    build_payload, summarize_changes, AuditRecord, CollectionRegistry, HistoryCollection,
    HistorySchema, HistoryWriter, Operation,
};
use crate::config::HistoryOptions;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{
    document_id, DeleteOutcome, Document, Filter, FindAndModify, ReturnDocument, Update,
    UpdateOutcome,
};
use crate::storage::{DocumentStore, HistoryBackend};

/// A primary collection whose mutations are recorded in a history collection
pub struct TrackedCollection {
    name: String,
    store: Arc<dyn DocumentStore>,
    writer: HistoryWriter,
    options: HistoryOptions,
}

impl TrackedCollection {
    /// Track a collection of a store that also hosts the history
    ///
    /// A history backend set on the options takes precedence over `store`.
    pub fn new<S>(
        store: Arc<S>,
        name: impl Into<String>,
        options: HistoryOptions,
        registry: Arc<CollectionRegistry>,
    ) -> HistoryResult<Self>
    where
        S: DocumentStore + HistoryBackend + 'static,
    {
        let history = match options.backend() {
            Some(backend) => backend.clone(),
            None => store.clone() as Arc<dyn HistoryBackend>,
        };
        Self::with_backends(store, history, name, options, registry)
    }

    /// Track a collection, writing history to an explicit backend
    pub fn with_backends(
        store: Arc<dyn DocumentStore>,
        history: Arc<dyn HistoryBackend>,
        name: impl Into<String>,
        options: HistoryOptions,
        registry: Arc<CollectionRegistry>,
    ) -> HistoryResult<Self> {
        options.validate()?;

        let name = name.into();
        let schema = HistorySchema::new(
            options.metadata_fields().to_vec(),
            options.settings().indexes.clone(),
        );
        let writer = HistoryWriter::new(
            registry,
            history,
            options.history_collection_name(&name),
            schema,
        );

        Ok(Self {
            name,
            store,
            writer,
            options,
        })
    }

    /// Name of the primary collection
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the history collection
    pub fn history_collection_name(&self) -> &str {
        self.writer.collection_name()
    }

    pub fn options(&self) -> &HistoryOptions {
        &self.options
    }

    /// Handle on the history collection
    pub async fn history(&self) -> HistoryResult<Arc<HistoryCollection>> {
        self.writer.collection().await
    }

    /// Remove every history record of this collection
    pub async fn clear_history(&self) -> HistoryResult<u64> {
        self.history().await?.clear().await
    }

    // ---- reads ----

    pub async fn find_one(&self, filter: &Filter) -> HistoryResult<Option<Document>> {
        self.store.find_one(&self.name, filter).await
    }

    pub async fn find(&self, filter: &Filter) -> HistoryResult<Vec<Document>> {
        self.store.find(&self.name, filter).await
    }

    // ---- inserts ----

    /// Insert a document and record it
    pub async fn insert_one(&self, doc: Document) -> HistoryResult<Document> {
        let stored = self.store.insert_one(&self.name, doc).await?;

        let written = self.writer.write_one(AuditRecord::insert(&stored)).await;
        self.settle(Operation::Insert, written.map(drop))?;
        Ok(stored)
    }

    /// Insert a new document, or replace the stored one with the same `_id`
    pub async fn save(&self, doc: Document) -> HistoryResult<Document> {
        let Some(id) = document_id(&doc).cloned() else {
            return self.insert_one(doc).await;
        };
        let filter = Filter::by_id(id);

        let existing = self
            .capture(Operation::Update, self.store.find_one(&self.name, &filter))
            .await?;

        match existing {
            Some(None) => self.insert_one(doc).await,
            Some(Some(old)) => {
                let outcome = self
                    .store
                    .update_one(&self.name, &filter, &Update::replace(doc.clone()))
                    .await?;
                if outcome.matched == 0 {
                    // Deleted since the lookup
                    return self.insert_one(doc).await;
                }
                let current = self.record_update(old, &filter).await?;
                Ok(current.unwrap_or(doc))
            }
            None => {
                let outcome = self
                    .store
                    .update_one(&self.name, &filter, &Update::replace(doc.clone()))
                    .await?;
                if outcome.matched == 0 {
                    return self.insert_one(doc).await;
                }
                Ok(doc)
            }
        }
    }

    // ---- single-document updates ----

    /// Update the first document matching the filter
    pub async fn update_one(&self, filter: &Filter, update: &Update) -> HistoryResult<UpdateOutcome> {
        let old = self
            .capture(Operation::Update, self.store.find_one(&self.name, filter))
            .await?;

        let outcome = self.store.update_one(&self.name, filter, update).await?;
        if outcome.matched == 0 {
            return Ok(outcome);
        }

        match old {
            Some(Some(old)) => {
                let lookup = identity_filter(&old, filter);
                self.record_update(old, &lookup).await?;
            }
            Some(None) => self.skip(Operation::Update, "matched document was not captured"),
            None => {}
        }
        Ok(outcome)
    }

    /// Replace the first document matching the filter, keeping its `_id`
    pub async fn replace_one(&self, filter: &Filter, doc: Document) -> HistoryResult<UpdateOutcome> {
        self.update_one(filter, &Update::replace(doc)).await
    }

    /// Update the first matching document and return it as requested
    ///
    /// An upsert is recorded as an insert.
    pub async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> HistoryResult<Option<Document>> {
        let Some(old) = self
            .capture(Operation::Update, self.store.find_one(&self.name, filter))
            .await?
        else {
            return self
                .store
                .find_one_and_update(&self.name, filter, update, options)
                .await;
        };

        let after_image = FindAndModify {
            return_document: ReturnDocument::After,
            ..options
        };
        let Some(new) = self
            .store
            .find_one_and_update(&self.name, filter, update, after_image)
            .await?
        else {
            return Ok(None);
        };

        let record = match &old {
            Some(old) => self.build_record(Some(old), &new, Operation::Update),
            None if options.upsert => AuditRecord::insert(&new),
            None => self.build_record(None, &new, Operation::Update),
        };
        let operation = record.o;
        let written = self.writer.write_one(record).await;
        self.settle(operation, written.map(drop))?;

        Ok(match options.return_document {
            ReturnDocument::Before => old,
            ReturnDocument::After => Some(new),
        })
    }

    /// Replace the first matching document and return it as requested
    pub async fn find_one_and_replace(
        &self,
        filter: &Filter,
        doc: Document,
        options: FindAndModify,
    ) -> HistoryResult<Option<Document>> {
        self.find_one_and_update(filter, &Update::replace(doc), options)
            .await
    }

    // ---- bulk updates ----

    /// Update every document matching the filter
    ///
    /// One record is written per matched document, in a single batch.
    pub async fn update_many(&self, filter: &Filter, update: &Update) -> HistoryResult<UpdateOutcome> {
        let stashed = self
            .capture(Operation::Update, self.store.find(&self.name, filter))
            .await?;

        let outcome = self.store.update_many(&self.name, filter, update).await?;
        if outcome.matched == 0 {
            return Ok(outcome);
        }
        let Some(stashed) = stashed.filter(|docs| !docs.is_empty()) else {
            return Ok(outcome);
        };

        let ids: Vec<Value> = stashed.iter().filter_map(|d| document_id(d).cloned()).collect();
        let current = match self.store.find(&self.name, &Filter::ids(ids)).await {
            Ok(docs) => docs,
            Err(e) => {
                self.settle(Operation::Update, Err(HistoryError::capture(&self.name, e)))?;
                return Ok(outcome);
            }
        };
        let mut current: HashMap<String, Document> = current
            .into_iter()
            .filter_map(|d| {
                let id = document_id(&d)?.to_string();
                Some((id, d))
            })
            .collect();

        let records = stashed
            .into_iter()
            .map(|old| {
                let post = document_id(&old)
                    .map(Value::to_string)
                    .and_then(|id| current.remove(&id));
                match post {
                    Some(new) => self.build_record(Some(&old), &new, Operation::Update),
                    None => self.fallback_record(old),
                }
            })
            .collect();

        let written = self.writer.write_many(records).await;
        self.settle(Operation::Update, written.map(drop))?;
        Ok(outcome)
    }

    // ---- deletes ----

    /// Delete the first document matching the filter
    pub async fn delete_one(&self, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        let old = self
            .capture(Operation::Delete, self.store.find_one(&self.name, filter))
            .await?;

        let outcome = self.store.delete_one(&self.name, filter).await?;
        if outcome.deleted == 0 {
            return Ok(outcome);
        }

        match old {
            Some(Some(old)) => {
                let written = self.writer.write_one(AuditRecord::delete(&old)).await;
                self.settle(Operation::Delete, written.map(drop))?;
            }
            Some(None) => self.skip(Operation::Delete, "deleted document was not captured"),
            None => {}
        }
        Ok(outcome)
    }

    /// Delete a document by its `_id`
    pub async fn delete_document(&self, doc: &Document) -> HistoryResult<DeleteOutcome> {
        let id = document_id(doc).cloned().ok_or_else(|| {
            HistoryError::Validation(format!(
                "Cannot delete a document without an _id from '{}'",
                self.name
            ))
        })?;
        self.delete_one(&Filter::by_id(id)).await
    }

    /// Delete every document matching the filter
    pub async fn delete_many(&self, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        let stashed = self
            .capture(Operation::Delete, self.store.find(&self.name, filter))
            .await?;

        let outcome = self.store.delete_many(&self.name, filter).await?;
        if outcome.deleted == 0 {
            return Ok(outcome);
        }

        if let Some(stashed) = stashed {
            let records = stashed.iter().map(AuditRecord::delete).collect();
            let written = self.writer.write_many(records).await;
            self.settle(Operation::Delete, written.map(drop))?;
        }
        Ok(outcome)
    }

    /// Delete the first matching document and return it
    pub async fn find_one_and_delete(&self, filter: &Filter) -> HistoryResult<Option<Document>> {
        let removed = self.store.find_one_and_delete(&self.name, filter).await?;

        if let Some(doc) = &removed {
            let written = self.writer.write_one(AuditRecord::delete(doc)).await;
            self.settle(Operation::Delete, written.map(drop))?;
        }
        Ok(removed)
    }

    // ---- pipeline stages ----

    /// Run a state-capturing fetch
    ///
    /// `Ok(None)` means the state is unavailable and the mutation will not
    /// be audited. Strict collections return the error instead.
    async fn capture<T, F>(&self, operation: Operation, fetch: F) -> HistoryResult<Option<T>>
    where
        F: Future<Output = HistoryResult<T>>,
    {
        match fetch.await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let err = HistoryError::capture(&self.name, e);
                if self.options.is_strict() {
                    return Err(err);
                }
                tracing::warn!(
                    collection = %self.name,
                    operation = %operation,
                    error = %err,
                    "state capture failed; mutation will not be audited"
                );
                Ok(None)
            }
        }
    }

    /// Decide whether an audit failure reaches the caller
    fn settle(&self, operation: Operation, result: HistoryResult<()>) -> HistoryResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if self.options.is_strict() => Err(e),
            Err(e) => {
                tracing::warn!(
                    collection = %self.name,
                    operation = %operation,
                    error = %e,
                    "history not recorded"
                );
                Ok(())
            }
        }
    }

    fn skip(&self, operation: Operation, reason: &str) {
        tracing::warn!(
            collection = %self.name,
            operation = %operation,
            reason,
            "mutation not audited"
        );
    }

    /// Re-fetch an updated document and record the change
    ///
    /// Returns the re-fetched post-state, or `None` when it could not be
    /// read. The pre-state only ever feeds the audit payload.
    async fn record_update(&self, old: Document, lookup: &Filter) -> HistoryResult<Option<Document>> {
        let fetched = match self.store.find_one(&self.name, lookup).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.settle(Operation::Update, Err(HistoryError::capture(&self.name, e)))?;
                return Ok(None);
            }
        };

        let record = match &fetched {
            Some(new) => self.build_record(Some(&old), new, Operation::Update),
            None => self.fallback_record(old),
        };
        let written = self.writer.write_one(record).await;
        self.settle(Operation::Update, written.map(drop))?;
        Ok(fetched)
    }

    /// Build the record for a mutation from its before and after states
    ///
    /// A failing comparator degrades this record to a full snapshot.
    fn build_record(&self, old: Option<&Document>, new: &Document, operation: Operation) -> AuditRecord {
        if let Some(old) = old.filter(|_| tracing::enabled!(tracing::Level::DEBUG)) {
            if let Some(summary) =
                summarize_changes(&Value::Object(old.clone()), &Value::Object(new.clone()))
            {
                tracing::debug!(
                    collection = %self.name,
                    operation = %operation,
                    changes = %summary,
                    "document changed"
                );
            }
        }

        let comparator = self.options.diff_comparator();
        let payload = build_payload(old, new, operation, self.options.diff_mode(), comparator.as_ref())
            .unwrap_or_else(|e| {
                tracing::warn!(
                    collection = %self.name,
                    operation = %operation,
                    error = %e,
                    "diff failed; recording full snapshot"
                );
                Value::Object(new.clone())
            });
        AuditRecord::new(operation, payload)
    }

    /// Record for an updated document that vanished before its post-state
    /// could be read
    ///
    /// The payload is the pre-update state. This is a best-effort
    /// approximation and does not describe the change.
    fn fallback_record(&self, old: Document) -> AuditRecord {
        tracing::warn!(
            collection = %self.name,
            id = ?document_id(&old),
            "updated document no longer found; recording its prior state"
        );
        AuditRecord::update(Value::Object(old))
    }
}

impl std::fmt::Debug for TrackedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCollection")
            .field("name", &self.name)
            .field("store", &self.store.name())
            .field("history", &self.writer.collection_name())
            .field("options", &self.options)
            .finish()
    }
}

fn identity_filter(doc: &Document, fallback: &Filter) -> Filter {
    match document_id(doc) {
        Some(id) => Filter::by_id(id.clone()),
        None => fallback.clone(),
    }
}
