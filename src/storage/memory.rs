//! In-memory document store
//!
//! Holds named collections of documents in insertion order. The same store
//! can act as the primary store and as a history backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::entry::AuditRecord;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{
    DeleteOutcome, Document, Filter, FindAndModify, IndexSpec, ReturnDocument, Update,
    UpdateOutcome, ID_FIELD, VERSION_FIELD,
};

use super::{record_matches, DocumentStore, HistoryBackend};

/// Name of the implicit identifier index
const ID_INDEX: &str = "_id_";

type Collections = HashMap<String, Vec<Document>>;

/// In-memory store for documents and history records
pub struct MemoryStore {
    name: String,
    collections: RwLock<Collections>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
}

impl MemoryStore {
    /// Create an empty store identified by `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> HistoryResult<Vec<String>> {
        let collections = self.read()?;
        let mut names: Vec<_> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> HistoryResult<usize> {
        Ok(self.read()?.get(collection).map_or(0, Vec::len))
    }

    fn read(&self) -> HistoryResult<RwLockReadGuard<'_, Collections>> {
        self.collections
            .read()
            .map_err(|e| HistoryError::Storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> HistoryResult<RwLockWriteGuard<'_, Collections>> {
        self.collections
            .write()
            .map_err(|e| HistoryError::Storage(format!("Failed to acquire write lock: {}", e)))
    }

    fn matching(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<Document>> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }
}

/// Give a new document its identifier and version counter
fn prepare_new(mut doc: Document, existing: &[Document]) -> HistoryResult<Document> {
    match doc.get(ID_FIELD) {
        Some(id) if !id.is_null() => {
            if existing.iter().any(|d| d.get(ID_FIELD) == Some(id)) {
                return Err(HistoryError::Storage(format!("Duplicate key: _id {}", id)));
            }
        }
        _ => {
            doc.insert(
                ID_FIELD.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
    }
    doc.entry(VERSION_FIELD.to_string()).or_insert(Value::from(0));
    Ok(doc)
}

fn bump_version(doc: &mut Document) {
    let next = doc.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0) + 1;
    doc.insert(VERSION_FIELD.to_string(), Value::from(next));
}

/// Apply an update and bump the version if anything changed
fn modify(doc: &mut Document, update: &Update) -> bool {
    let changed = update.apply(doc);
    if changed {
        bump_version(doc);
    }
    changed
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> HistoryResult<Option<Document>> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<Document>> {
        self.matching(collection, filter)
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> HistoryResult<Document> {
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();
        let doc = prepare_new(doc, docs)?;
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome> {
        let mut collections = self.write()?;
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(d)))
        else {
            return Ok(UpdateOutcome::default());
        };

        let modified = modify(doc, update);
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(modified),
            upserted_id: None,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome> {
        let mut collections = self.write()?;
        let mut outcome = UpdateOutcome::default();
        if let Some(docs) = collections.get_mut(collection) {
            for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
                outcome.matched += 1;
                if modify(doc, update) {
                    outcome.modified += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(DeleteOutcome::default());
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(DeleteOutcome { deleted: 1 })
            }
            None => Ok(DeleteOutcome::default()),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(DeleteOutcome::default());
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok(DeleteOutcome {
            deleted: (before - docs.len()) as u64,
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> HistoryResult<Option<Document>> {
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(doc) = docs.iter_mut().find(|d| filter.matches(d)) {
            let before = doc.clone();
            modify(doc, update);
            return Ok(Some(match options.return_document {
                ReturnDocument::Before => before,
                ReturnDocument::After => doc.clone(),
            }));
        }

        if !options.upsert {
            return Ok(None);
        }

        let mut seed = filter.seed_document();
        update.apply(&mut seed);
        let created = prepare_new(seed, docs)?;
        docs.push(created.clone());
        Ok(match options.return_document {
            ReturnDocument::Before => None,
            ReturnDocument::After => Some(created),
        })
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> HistoryResult<Option<Document>> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        Ok(docs
            .iter()
            .position(|d| filter.matches(d))
            .map(|index| docs.remove(index)))
    }
}

#[async_trait]
impl HistoryBackend for MemoryStore {
    fn connection_name(&self) -> &str {
        &self.name
    }

    async fn prepare_collection(&self, collection: &str, indexes: &[IndexSpec]) -> HistoryResult<()> {
        self.write()?.entry(collection.to_string()).or_default();

        let mut registered = self
            .indexes
            .write()
            .map_err(|e| HistoryError::Storage(format!("Failed to acquire write lock: {}", e)))?;
        let specs = registered.entry(collection.to_string()).or_default();
        for spec in indexes {
            if !specs.iter().any(|s| s.name() == spec.name()) {
                specs.push(spec.clone());
            }
        }
        Ok(())
    }

    async fn index_names(&self, collection: &str) -> HistoryResult<Vec<String>> {
        let registered = self
            .indexes
            .read()
            .map_err(|e| HistoryError::Storage(format!("Failed to acquire read lock: {}", e)))?;
        let mut names = vec![ID_INDEX.to_string()];
        if let Some(specs) = registered.get(collection) {
            names.extend(specs.iter().map(IndexSpec::name));
        }
        Ok(names)
    }

    async fn append(&self, collection: &str, record: &AuditRecord) -> HistoryResult<()> {
        let doc = record.to_document()?;
        self.write()?
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(())
    }

    async fn append_many(&self, collection: &str, records: &[AuditRecord]) -> HistoryResult<()> {
        let docs = records
            .iter()
            .map(AuditRecord::to_document)
            .collect::<HistoryResult<Vec<_>>>()?;
        self.write()?
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(())
    }

    async fn records(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<AuditRecord>> {
        let docs = self.matching(collection, &Filter::all())?;
        let mut records = Vec::new();
        for doc in docs {
            let record = AuditRecord::from_document(doc)?;
            if record_matches(&record, filter)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn replace_record(&self, collection: &str, record: &AuditRecord) -> HistoryResult<bool> {
        let doc = record.to_document()?;
        let id = doc.get(ID_FIELD).cloned();
        let mut collections = self.write()?;
        let Some(stored) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.get(ID_FIELD) == id.as_ref()))
        else {
            return Ok(false);
        };
        *stored = doc;
        Ok(true)
    }

    async fn clear_collection(&self, collection: &str) -> HistoryResult<u64> {
        let mut collections = self.write()?;
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.drain(..).count() as u64)
            .unwrap_or(0))
    }
}
