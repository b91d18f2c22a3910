//! Generic mutable documents and the query/update shapes applied to them
//!
//! Documents are plain JSON objects. The identifier lives in `_id` and the
//! store-managed version counter in `__v`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HistoryError, HistoryResult};

/// A stored document: a JSON object keyed by field name
pub type Document = Map<String, Value>;

/// Field holding a document's identifier
pub const ID_FIELD: &str = "_id";

/// Field holding the store-managed version counter
pub const VERSION_FIELD: &str = "__v";

/// Store-internal fields that never show up in a change-set
pub const RESERVED_FIELDS: [&str; 2] = [VERSION_FIELD, "_v"];

/// Check whether a field is an internal version counter
pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

/// Get the identifier of a document
pub fn document_id(doc: &Document) -> Option<&Value> {
    doc.get(ID_FIELD).filter(|id| !id.is_null())
}

/// Convert any serializable value into a document
///
/// Fails with a validation error when the value is not a JSON object.
pub fn to_document<T: Serialize>(value: &T) -> HistoryResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(HistoryError::Validation(format!(
            "Expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Resolve a dotted path (`d.title`, `address.city`) inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A single predicate of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    /// Field at path equals the value
    Eq(String, Value),
    /// Field at path equals one of the values
    In(String, Vec<Value>),
}

impl Predicate {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Eq(path, expected) => match lookup(doc, path) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            },
            Predicate::In(path, candidates) => lookup(doc, path)
                .map(|actual| candidates.contains(actual))
                .unwrap_or(false),
        }
    }
}

/// Conjunction of predicates selecting documents
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Match every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose field equals the value
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(path, value)
    }

    /// Match the document with the given identifier
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::eq(ID_FIELD, id)
    }

    /// Match any document whose identifier is in the list
    pub fn ids(ids: Vec<Value>) -> Self {
        Self {
            predicates: vec![Predicate::In(ID_FIELD.to_string(), ids)],
        }
    }

    /// Add an equality predicate
    pub fn and(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(path.into(), value.into()));
        self
    }

    /// Check whether a document satisfies every predicate
    pub fn matches(&self, doc: &Document) -> bool {
        self.predicates.iter().all(|p| p.matches(doc))
    }

    /// Top-level equality fields, used to seed a document on upsert
    pub fn seed_document(&self) -> Document {
        let mut seed = Document::new();
        for predicate in &self.predicates {
            if let Predicate::Eq(path, value) = predicate {
                if !path.contains('.') {
                    seed.insert(path.clone(), value.clone());
                }
            }
        }
        seed
    }

    /// Get the predicates of this filter
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

/// Modification applied to matched documents
///
/// Either a set of top-level field assignments/removals, or a whole
/// replacement that keeps the original identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default, rename = "$set", skip_serializing_if = "Map::is_empty")]
    set: Document,
    #[serde(default, rename = "$unset", skip_serializing_if = "Vec::is_empty")]
    unset: Vec<String>,
    #[serde(default, rename = "$replace", skip_serializing_if = "Option::is_none")]
    replacement: Option<Document>,
}

impl Update {
    /// Assign one field
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_set(field, value)
    }

    /// Assign every field of the given document
    pub fn set_all(fields: Document) -> Self {
        Self {
            set: fields,
            ..Self::default()
        }
    }

    /// Remove one field
    pub fn unset(field: impl Into<String>) -> Self {
        Self::default().and_unset(field)
    }

    /// Replace the whole document, keeping its identifier
    pub fn replace(doc: Document) -> Self {
        Self {
            replacement: Some(doc),
            ..Self::default()
        }
    }

    /// Chain another field assignment
    pub fn and_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Chain another field removal
    pub fn and_unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    /// Check whether this update replaces whole documents
    pub fn is_replacement(&self) -> bool {
        self.replacement.is_some()
    }

    /// Apply the update in place
    ///
    /// Returns whether any user field changed. The identifier and the
    /// version counter are never touched here.
    pub fn apply(&self, doc: &mut Document) -> bool {
        let before = doc.clone();

        if let Some(replacement) = &self.replacement {
            let id = doc.get(ID_FIELD).cloned();
            let version = doc.get(VERSION_FIELD).cloned();
            *doc = replacement.clone();
            doc.remove(ID_FIELD);
            doc.remove(VERSION_FIELD);
            if let Some(id) = id {
                doc.insert(ID_FIELD.to_string(), id);
            }
            if let Some(version) = version {
                doc.insert(VERSION_FIELD.to_string(), version);
            }
        }

        for (field, value) in &self.set {
            if field == ID_FIELD || is_reserved(field) {
                continue;
            }
            doc.insert(field.clone(), value.clone());
        }

        for field in &self.unset {
            if field == ID_FIELD || is_reserved(field) {
                continue;
            }
            doc.remove(field);
        }

        *doc != before
    }
}

/// What to hand back from a find-and-modify call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDocument {
    /// The document as it was before the update
    Before,
    /// The document as it is after the update
    #[default]
    After,
}

/// Options for find-and-modify calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindAndModify {
    pub return_document: ReturnDocument,
    /// Insert a new document when nothing matches
    pub upsert: bool,
}

impl FindAndModify {
    /// Return the updated document
    pub fn after() -> Self {
        Self::default()
    }

    /// Return the document as it was before the update
    pub fn before() -> Self {
        Self {
            return_document: ReturnDocument::Before,
            upsert: false,
        }
    }

    /// Insert when nothing matches
    pub fn with_upsert(mut self) -> Self {
        self.upsert = true;
        self
    }
}

/// Result reported by update calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents the filter matched
    pub matched: u64,
    /// Number of documents whose fields actually changed
    pub modified: u64,
    /// Identifier of a document created by an upsert
    pub upserted_id: Option<Value>,
}

/// Result reported by delete calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Number of documents removed
    pub deleted: u64,
}
