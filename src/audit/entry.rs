//! Audit record data structures
//!
//! Defines the operation codes and the immutable record written to a
//! history collection for every captured mutation.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HistoryError, HistoryResult};
use crate::models::{Document, RecordId};

/// Names every history record reserves for itself
pub const RECORD_FIELDS: [&str; 4] = ["_id", "t", "o", "d"];

/// Types of operations that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Document was inserted
    #[serde(rename = "i")]
    Insert,
    /// Document was updated
    #[serde(rename = "u")]
    Update,
    /// Document was deleted
    #[serde(rename = "d")]
    Delete,
}

impl Operation {
    /// Single-letter code stored in the `o` field
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Insert => "i",
            Operation::Update => "u",
            Operation::Delete => "d",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Capture timestamp, strictly increasing within this process
pub fn next_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    let now_micros = now.timestamp_micros();
    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = if now_micros > last { now_micros } else { last + 1 };
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                let secs = candidate.div_euclid(1_000_000);
                let nanos = (candidate.rem_euclid(1_000_000) * 1_000) as u32;
                return DateTime::from_timestamp(secs, nanos).unwrap_or(now);
            }
            Err(actual) => last = actual,
        }
    }
}

/// A single history record
///
/// `t`, `o` and `d` are required. Metadata fields declared by the history
/// collection are flattened next to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Identifier of this record
    #[serde(rename = "_id")]
    pub id: RecordId,

    /// When the mutation was captured (UTC)
    pub t: DateTime<Utc>,

    /// Type of operation performed
    pub o: Operation,

    /// Document snapshot or change-set
    pub d: Value,

    /// Derived metadata fields
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl AuditRecord {
    /// Create a record stamped with the current capture time
    pub fn new(operation: Operation, payload: Value) -> Self {
        Self {
            id: RecordId::new(),
            t: next_timestamp(),
            o: operation,
            d: payload,
            metadata: Map::new(),
        }
    }

    /// Create a record for an inserted document
    pub fn insert(doc: &Document) -> Self {
        Self::new(Operation::Insert, Value::Object(doc.clone()))
    }

    /// Create a record for an updated document
    pub fn update(payload: Value) -> Self {
        Self::new(Operation::Update, payload)
    }

    /// Create a record for a deleted document
    pub fn delete(doc: &Document) -> Self {
        Self::new(Operation::Delete, Value::Object(doc.clone()))
    }

    /// Rebuild a record from its stored form
    ///
    /// Fails with a validation error naming the missing or malformed field.
    pub fn from_document(doc: Document) -> HistoryResult<Self> {
        for required in ["t", "o", "d"] {
            if doc.get(required).map_or(true, Value::is_null) {
                return Err(HistoryError::Validation(format!(
                    "History record is missing required field '{}'",
                    required
                )));
            }
        }
        serde_json::from_value(Value::Object(doc))
            .map_err(|e| HistoryError::Validation(format!("Malformed history record: {}", e)))
    }

    /// Convert the record into its stored form
    pub fn to_document(&self) -> HistoryResult<Document> {
        crate::models::to_document(self)
    }

    /// Identifier of the document the payload describes, if any
    pub fn document_id(&self) -> Option<&Value> {
        self.d.get(crate::models::ID_FIELD)
    }

    /// Format the record for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {}",
            self.t.format("%Y-%m-%d %H:%M:%S%.6f UTC"),
            self.o,
            self.id
        );

        if let Some(doc_id) = self.document_id() {
            output.push_str(&format!(" (document {})", doc_id));
        }

        if !self.metadata.is_empty() {
            let keys: Vec<&str> = self.metadata.keys().map(String::as_str).collect();
            output.push_str(&format!("\n  Metadata: {}", keys.join(", ")));
        }

        output
    }
}
