//! Change capture for doc-history
//!
//! Builds, enriches and persists the history records written for every
//! mutation of a tracked collection.
//!
//! # Architecture
//!
//! - `AuditRecord`: one immutable history record with capture time `t`,
//!   operation `o`, payload `d` and derived metadata.
//! - `build_payload`: full snapshot or minimal change-set between two
//!   document states, with an overridable `DiffComparator`.
//! - `DerivationRule`: how a metadata field is computed (static, sync or
//!   async). Async rules only run through `HistoryCollection::enrich`.
//! - `CollectionRegistry`: cached `HistoryCollection` handles keyed by
//!   connection and collection name.
//! - `HistoryWriter`: writes one or many records through the registry.
//!
//! # Example
//!
//! ```rust,ignore
//! use doc_history::audit::{AuditRecord, CollectionRegistry, HistorySchema, HistoryWriter};
//!
//! let writer = HistoryWriter::new(registry, backend, "posts_history", HistorySchema::default());
//! writer.write_one(AuditRecord::insert(&doc)).await?;
//! ```

pub mod collection;
pub mod diff;
pub mod enrich;
pub mod entry;
pub mod registry;
pub mod writer;

pub use collection::{payload_field, HistoryCollection, HistorySchema};
pub use diff::{
    build_payload, summarize_changes, DiffComparator, DiffMode, StructuralComparator,
    UnorderedSetComparator,
};
pub use enrich::{
    apply_async, apply_sync, AsyncDerive, DerivationRule, DeriveContext, MetadataField, RuleKind,
    SyncDerive,
};
pub use entry::{next_timestamp, AuditRecord, Operation, RECORD_FIELDS};
pub use registry::CollectionRegistry;
pub use writer::HistoryWriter;
