//! Core data models for doc-history
//!
//! This module contains the shapes shared between the primary store and the
//! audit pipeline: documents, filters, updates, index definitions and
//! record identifiers.

pub mod document;
pub mod ids;
pub mod index;

pub use document::{
    document_id, is_reserved, lookup, to_document, DeleteOutcome, Document, Filter,
    FindAndModify, Predicate, ReturnDocument, Update, UpdateOutcome, ID_FIELD, VERSION_FIELD,
};
pub use ids::RecordId;
pub use index::IndexSpec;
