//! doc-history - Change-capture audit history for document collections
//!
//! Every insert, update and delete made through a tracked collection is
//! recorded in a separate, append-only history collection. A record holds
//! the capture time, the operation, and either the full document or only
//! the fields that changed.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: History options, declarative settings and paths
//! - `error`: Custom error types
//! - `models`: Documents, filters, updates and index specifications
//! - `audit`: History records, diffing, metadata and the collection registry
//! - `storage`: Store traits, the in-memory store and the JSONL backend
//! - `tracked`: The mutation interceptor wrapping a primary collection
//!
//! # Example
//!
//! ```rust,ignore
//! use doc_history::{CollectionRegistry, HistoryOptions, MemoryStore, TrackedCollection};
//!
//! let store = Arc::new(MemoryStore::new("main"));
//! let registry = Arc::new(CollectionRegistry::new());
//! let posts = TrackedCollection::new(store, "posts", HistoryOptions::new().diff_only(true), registry)?;
//!
//! posts.insert_one(doc).await?;
//! let records = posts.history().await?.all().await?;
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod tracked;

pub use audit::{
    AuditRecord, CollectionRegistry, DerivationRule, DiffComparator, DiffMode, HistoryCollection,
    Operation, UnorderedSetComparator,
};
pub use config::{HistoryOptions, HistoryPaths, HistorySettings};
pub use error::{HistoryError, HistoryResult};
pub use models::{Document, Filter, FindAndModify, IndexSpec, Update};
pub use storage::{DocumentStore, HistoryBackend, JsonlBackend, MemoryStore};
pub use tracked::TrackedCollection;
