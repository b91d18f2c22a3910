//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use doc_history::audit::AuditRecord;
use doc_history::models::{DeleteOutcome, UpdateOutcome};
use doc_history::{
    CollectionRegistry, Document, DocumentStore, Filter, FindAndModify, HistoryBackend,
    HistoryError, HistoryOptions, HistoryResult, IndexSpec, MemoryStore, TrackedCollection,
    Update,
};
use serde_json::{json, Value};

/// Route library logs to the test output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture must be an object")
}

pub fn post() -> Document {
    doc(json!({
        "updatedFor": "mail@test.com",
        "title": "Title test",
        "message": "message lorem ipsum test",
    }))
}

pub fn tagged_post(tags: &[&str]) -> Document {
    let mut post = post();
    post.insert("tags".into(), json!(tags));
    post
}

/// A tracked `posts` collection on a fresh in-memory store
pub fn tracked_posts(options: HistoryOptions) -> (Arc<MemoryStore>, TrackedCollection) {
    init_tracing();
    let store = Arc::new(MemoryStore::new("main"));
    let posts = TrackedCollection::new(
        store.clone(),
        "posts",
        options,
        Arc::new(CollectionRegistry::new()),
    )
    .expect("valid options");
    (store, posts)
}

pub async fn history(posts: &TrackedCollection) -> Vec<AuditRecord> {
    posts
        .history()
        .await
        .expect("history collection")
        .all()
        .await
        .expect("history records")
}

pub async fn history_where(posts: &TrackedCollection, filter: &Filter) -> Vec<AuditRecord> {
    posts
        .history()
        .await
        .expect("history collection")
        .find(filter)
        .await
        .expect("history records")
}

/// Store wrapper whose reads or history writes can be made to fail
///
/// Reads can also be limited to a budget; once it is spent, reads either
/// fail or find nothing, as if the documents had vanished.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_history: AtomicBool,
    reads_left: AtomicUsize,
    vanish_when_spent: AtomicBool,
    batches: AtomicUsize,
}

impl FlakyStore {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStore::new(name),
            fail_reads: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            reads_left: AtomicUsize::new(usize::MAX),
            vanish_when_spent: AtomicBool::new(false),
            batches: AtomicUsize::new(0),
        }
    }

    pub fn fail_reads(&self, enabled: bool) {
        self.fail_reads.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_history(&self, enabled: bool) {
        self.fail_history.store(enabled, Ordering::SeqCst);
    }

    /// Let `reads` more reads through, then fail every read
    pub fn fail_reads_after(&self, reads: usize) {
        self.vanish_when_spent.store(false, Ordering::SeqCst);
        self.reads_left.store(reads, Ordering::SeqCst);
    }

    /// Let `reads` more reads through, then find nothing
    pub fn vanish_after(&self, reads: usize) {
        self.vanish_when_spent.store(true, Ordering::SeqCst);
        self.reads_left.store(reads, Ordering::SeqCst);
    }

    /// Number of `append_many` calls that reached the backend
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// `Ok(false)` means the read should find nothing
    fn check_reads(&self) -> HistoryResult<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(HistoryError::Storage("store unreachable".into()));
        }
        let within_budget = self
            .reads_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if within_budget {
            Ok(true)
        } else if self.vanish_when_spent.load(Ordering::SeqCst) {
            Ok(false)
        } else {
            Err(HistoryError::Storage("store unreachable".into()))
        }
    }

    fn check_history(&self) -> HistoryResult<()> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(HistoryError::Storage("history store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> HistoryResult<Option<Document>> {
        if !self.check_reads()? {
            return Ok(None);
        }
        self.inner.find_one(collection, filter).await
    }

    async fn find(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<Document>> {
        if !self.check_reads()? {
            return Ok(Vec::new());
        }
        self.inner.find(collection, filter).await
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> HistoryResult<Document> {
        self.inner.insert_one(collection, doc).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome> {
        self.inner.update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> HistoryResult<UpdateOutcome> {
        self.inner.update_many(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> HistoryResult<DeleteOutcome> {
        self.inner.delete_many(collection, filter).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> HistoryResult<Option<Document>> {
        self.inner
            .find_one_and_update(collection, filter, update, options)
            .await
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> HistoryResult<Option<Document>> {
        self.inner.find_one_and_delete(collection, filter).await
    }
}

#[async_trait]
impl HistoryBackend for FlakyStore {
    fn connection_name(&self) -> &str {
        self.inner.connection_name()
    }

    async fn prepare_collection(&self, collection: &str, indexes: &[IndexSpec]) -> HistoryResult<()> {
        self.inner.prepare_collection(collection, indexes).await
    }

    async fn index_names(&self, collection: &str) -> HistoryResult<Vec<String>> {
        self.inner.index_names(collection).await
    }

    async fn append(&self, collection: &str, record: &AuditRecord) -> HistoryResult<()> {
        self.check_history()?;
        self.inner.append(collection, record).await
    }

    async fn append_many(&self, collection: &str, records: &[AuditRecord]) -> HistoryResult<()> {
        self.check_history()?;
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.append_many(collection, records).await
    }

    async fn records(&self, collection: &str, filter: &Filter) -> HistoryResult<Vec<AuditRecord>> {
        self.inner.records(collection, filter).await
    }

    async fn replace_record(&self, collection: &str, record: &AuditRecord) -> HistoryResult<bool> {
        self.check_history()?;
        self.inner.replace_record(collection, record).await
    }

    async fn clear_collection(&self, collection: &str) -> HistoryResult<u64> {
        self.inner.clear_collection(collection).await
    }
}

/// A tracked `posts` collection on a store that can be made to fail
pub fn flaky_posts(options: HistoryOptions) -> (Arc<FlakyStore>, TrackedCollection) {
    init_tracing();
    let store = Arc::new(FlakyStore::new("flaky"));
    let posts = TrackedCollection::new(
        store.clone(),
        "posts",
        options,
        Arc::new(CollectionRegistry::new()),
    )
    .expect("valid options");
    (store, posts)
}
