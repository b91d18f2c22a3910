//! Handle on one history collection
//!
//! A `HistoryCollection` binds a collection name on a backend to its
//! schema: the metadata fields records may carry and the indexes built at
//! creation. Handles are created through the `CollectionRegistry`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{HistoryError, HistoryResult};
use crate::models::{Filter, IndexSpec};
use crate::storage::HistoryBackend;

use super::enrich::{apply_async, apply_sync, DeriveContext, MetadataField};
use super::entry::AuditRecord;

/// Shape of the records stored in a history collection
#[derive(Debug, Clone, Default)]
pub struct HistorySchema {
    pub metadata: Vec<MetadataField>,
    pub indexes: Vec<IndexSpec>,
}

impl HistorySchema {
    pub fn new(metadata: Vec<MetadataField>, indexes: Vec<IndexSpec>) -> Self {
        Self { metadata, indexes }
    }

    /// Check a record before it is written
    ///
    /// The payload must be present and every metadata key must be declared.
    pub fn validate(&self, record: &AuditRecord) -> HistoryResult<()> {
        if record.d.is_null() {
            return Err(HistoryError::Validation(
                "History record payload 'd' is required".into(),
            ));
        }

        let declared: HashSet<&str> = self.metadata.iter().map(|f| f.name.as_str()).collect();
        if let Some(unknown) = record
            .metadata
            .keys()
            .find(|key| !declared.contains(key.as_str()))
        {
            return Err(HistoryError::Validation(format!(
                "History record field '{}' is not declared",
                unknown
            )));
        }

        Ok(())
    }
}

/// One history collection on one backend
pub struct HistoryCollection {
    name: String,
    backend: Arc<dyn HistoryBackend>,
    schema: HistorySchema,
}

impl HistoryCollection {
    /// Create the collection on the backend and register its indexes
    pub(crate) async fn create(
        backend: Arc<dyn HistoryBackend>,
        name: impl Into<String>,
        schema: HistorySchema,
    ) -> HistoryResult<Self> {
        let name = name.into();
        backend
            .prepare_collection(&name, &schema.indexes)
            .await
            .map_err(|e| HistoryError::persist(&name, e))?;

        tracing::debug!(
            connection = %backend.connection_name(),
            collection = %name,
            indexes = schema.indexes.len(),
            "history collection ready"
        );

        Ok(Self {
            name,
            backend,
            schema,
        })
    }

    /// Name of the collection
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the connection hosting the collection
    pub fn connection_name(&self) -> &str {
        self.backend.connection_name()
    }

    pub fn schema(&self) -> &HistorySchema {
        &self.schema
    }

    fn prepare(&self, record: &mut AuditRecord) -> HistoryResult<()> {
        let ctx = DeriveContext::for_record(&self.name, record);
        apply_sync(&self.schema.metadata, &ctx, record);
        self.schema.validate(record)
    }

    /// Persist one record after applying the inline metadata rules
    pub async fn insert_one(&self, mut record: AuditRecord) -> HistoryResult<AuditRecord> {
        self.prepare(&mut record)?;
        self.backend
            .append(&self.name, &record)
            .await
            .map_err(|e| HistoryError::persist(&self.name, e))?;
        Ok(record)
    }

    /// Persist several records in one backend call
    ///
    /// Nothing is written if any record fails validation.
    pub async fn insert_many(&self, records: Vec<AuditRecord>) -> HistoryResult<Vec<AuditRecord>> {
        let mut prepared = records;
        for record in &mut prepared {
            self.prepare(record)?;
        }
        if prepared.is_empty() {
            return Ok(prepared);
        }

        self.backend
            .append_many(&self.name, &prepared)
            .await
            .map_err(|e| HistoryError::persist(&self.name, e))?;
        Ok(prepared)
    }

    /// Records matching the filter, in insertion order
    pub async fn find(&self, filter: &Filter) -> HistoryResult<Vec<AuditRecord>> {
        self.backend.records(&self.name, filter).await
    }

    /// First record matching the filter
    pub async fn find_one(&self, filter: &Filter) -> HistoryResult<Option<AuditRecord>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Every record, in insertion order
    pub async fn all(&self) -> HistoryResult<Vec<AuditRecord>> {
        self.find(&Filter::all()).await
    }

    /// Number of records matching the filter
    pub async fn count(&self, filter: &Filter) -> HistoryResult<usize> {
        Ok(self.find(filter).await?.len())
    }

    /// Remove every record; returns how many were removed
    pub async fn clear(&self) -> HistoryResult<u64> {
        let removed = self.backend.clear_collection(&self.name).await?;
        tracing::info!(collection = %self.name, removed, "history cleared");
        Ok(removed)
    }

    /// Names of the indexes registered on the collection
    pub async fn index_names(&self) -> HistoryResult<Vec<String>> {
        self.backend.index_names(&self.name).await
    }

    /// Compute the async metadata fields of a stored record
    ///
    /// The record is written back once if a field changed, and not at all
    /// otherwise. Returns whether a write happened.
    pub async fn enrich(&self, record: &mut AuditRecord) -> HistoryResult<bool> {
        let ctx = DeriveContext::for_record(&self.name, record);
        if !apply_async(&self.schema.metadata, &ctx, record).await {
            return Ok(false);
        }

        self.schema.validate(record)?;
        let found = self
            .backend
            .replace_record(&self.name, record)
            .await
            .map_err(|e| HistoryError::persist(&self.name, e))?;
        if !found {
            return Err(HistoryError::NotFound {
                entity_type: "History record",
                identifier: record.id.to_string(),
            });
        }
        Ok(true)
    }

    /// Enrich every record matching the filter; returns how many were written
    pub async fn enrich_matching(&self, filter: &Filter) -> HistoryResult<usize> {
        let mut written = 0;
        for mut record in self.find(filter).await? {
            if self.enrich(&mut record).await? {
                written += 1;
            }
        }
        Ok(written)
    }
}

impl std::fmt::Debug for HistoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCollection")
            .field("name", &self.name)
            .field("connection", &self.backend.connection_name())
            .field("schema", &self.schema)
            .finish()
    }
}

/// Payload value at a dotted path, for callers inspecting records
pub fn payload_field<'a>(record: &'a AuditRecord, path: &str) -> Option<&'a Value> {
    match &record.d {
        Value::Object(payload) => crate::models::lookup(payload, path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::enrich::DerivationRule;
    use crate::audit::entry::Operation;
    use crate::models::Document;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    async fn create_test_collection(schema: HistorySchema) -> (Arc<MemoryStore>, HistoryCollection) {
        let store = Arc::new(MemoryStore::new("primary"));
        let collection = HistoryCollection::create(store.clone(), "posts_history", schema)
            .await
            .unwrap();
        (store, collection)
    }

    #[tokio::test]
    async fn test_insert_applies_inline_metadata() {
        let schema = HistorySchema::new(
            vec![
                MetadataField::new("title", DerivationRule::field("title")),
                MetadataField::new(
                    "op",
                    DerivationRule::sync(|ctx, _| Ok(json!(ctx.operation.code()))),
                ),
            ],
            Vec::new(),
        );
        let (_store, collection) = create_test_collection(schema).await;

        let stored = collection
            .insert_one(AuditRecord::insert(&doc(json!({"_id": 1, "title": "Hi"}))))
            .await
            .unwrap();
        assert_eq!(stored.metadata.get("title"), Some(&json!("Hi")));
        assert_eq!(stored.metadata.get("op"), Some(&json!("i")));

        let found = collection.find_one(&Filter::all()).await.unwrap().unwrap();
        assert_eq!(found, stored);
    }

    #[tokio::test]
    async fn test_null_payload_rejected() {
        let (_store, collection) = create_test_collection(HistorySchema::default()).await;
        let err = collection
            .insert_one(AuditRecord::new(Operation::Update, Value::Null))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(collection.count(&Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_metadata_rejected() {
        let (_store, collection) = create_test_collection(HistorySchema::default()).await;
        let mut record = AuditRecord::update(json!({"_id": 1}));
        record.metadata.insert("extra".into(), json!(true));

        let err = collection.insert_one(record).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let (_store, collection) = create_test_collection(HistorySchema::default()).await;
        let records = vec![
            AuditRecord::update(json!({"_id": 1})),
            AuditRecord::new(Operation::Update, Value::Null),
        ];
        assert!(collection.insert_many(records).await.is_err());
        assert_eq!(collection.count(&Filter::all()).await.unwrap(), 0);

        let records = vec![
            AuditRecord::update(json!({"_id": 1})),
            AuditRecord::update(json!({"_id": 2})),
        ];
        assert_eq!(collection.insert_many(records).await.unwrap().len(), 2);
        assert_eq!(collection.count(&Filter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enrich_writes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let schema = HistorySchema::new(
            vec![MetadataField::new(
                "summary",
                DerivationRule::async_fn(move |_ctx, payload: Value| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, HistoryError>(json!(payload["title"].as_str().map(str::len))) }
                }),
            )],
            Vec::new(),
        );
        let (_store, collection) = create_test_collection(schema).await;

        let stored = collection
            .insert_one(AuditRecord::insert(&doc(json!({"_id": 1, "title": "Hello"}))))
            .await
            .unwrap();
        assert!(!stored.metadata.contains_key("summary"));

        let mut fetched = collection.find_one(&Filter::all()).await.unwrap().unwrap();
        assert!(collection.enrich(&mut fetched).await.unwrap());
        assert_eq!(fetched.metadata.get("summary"), Some(&json!(5)));

        let mut again = collection.find_one(&Filter::all()).await.unwrap().unwrap();
        assert_eq!(again.metadata.get("summary"), Some(&json!(5)));
        assert!(!collection.enrich(&mut again).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_and_indexes() {
        let schema = HistorySchema::new(Vec::new(), vec![IndexSpec::ascending("t").then("d._id", 1)]);
        let (_store, collection) = create_test_collection(schema).await;
        assert!(collection
            .index_names()
            .await
            .unwrap()
            .contains(&"t_1_d._id_1".to_string()));

        collection
            .insert_one(AuditRecord::update(json!({"_id": 1})))
            .await
            .unwrap();
        assert_eq!(collection.clear().await.unwrap(), 1);
        assert!(collection.all().await.unwrap().is_empty());
    }

    #[test]
    fn test_payload_field() {
        let record = AuditRecord::update(json!({"_id": 1, "meta": {"author": "ana"}}));
        assert_eq!(payload_field(&record, "meta.author"), Some(&json!("ana")));
        assert_eq!(payload_field(&record, "missing"), None);
    }
}
