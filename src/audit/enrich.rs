//! Derived metadata attached to history records
//!
//! Static and sync rules run inline while a record is prepared for
//! persistence. Async rules never run during capture; they are applied on
//! request to a record that is already stored.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HistoryResult;
use crate::models::lookup;

use super::entry::{AuditRecord, Operation};

/// What a derivation function can see besides the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriveContext {
    /// Name of the history collection the record belongs to
    pub collection: String,
    /// Operation the record describes
    pub operation: Operation,
}

impl DeriveContext {
    /// Build the context for a record stored in `collection`
    pub fn for_record(collection: impl Into<String>, record: &AuditRecord) -> Self {
        Self {
            collection: collection.into(),
            operation: record.o,
        }
    }
}

/// Synchronous derivation function
pub type SyncDerive = Arc<dyn Fn(&DeriveContext, &Value) -> HistoryResult<Value> + Send + Sync>;

/// Asynchronous derivation, resolved when the returned future completes
#[async_trait]
pub trait AsyncDerive: Send + Sync {
    async fn derive(&self, ctx: DeriveContext, payload: Value) -> HistoryResult<Value>;
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> AsyncDerive for AsyncFn<F>
where
    F: Fn(DeriveContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = HistoryResult<Value>> + Send + 'static,
{
    async fn derive(&self, ctx: DeriveContext, payload: Value) -> HistoryResult<Value> {
        (self.0)(ctx, payload).await
    }
}

/// Which kind of rule a metadata field uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Static,
    Sync,
    Async,
}

/// How one metadata field is computed
#[derive(Clone)]
pub enum DerivationRule {
    /// Copy the value at this path of the payload
    Static(String),
    /// Compute the value inline
    Sync(SyncDerive),
    /// Compute the value on explicit enrichment only
    Async(Arc<dyn AsyncDerive>),
}

impl DerivationRule {
    /// Copy a payload field
    pub fn field(path: impl Into<String>) -> Self {
        Self::Static(path.into())
    }

    /// Derive the value with a synchronous function
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&DeriveContext, &Value) -> HistoryResult<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Derive the value with an async function
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(DeriveContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HistoryResult<Value>> + Send + 'static,
    {
        Self::Async(Arc::new(AsyncFn(f)))
    }

    /// Get the declared kind of this rule
    pub fn kind(&self) -> RuleKind {
        match self {
            Self::Static(_) => RuleKind::Static,
            Self::Sync(_) => RuleKind::Sync,
            Self::Async(_) => RuleKind::Async,
        }
    }
}

impl fmt::Debug for DerivationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(path) => f.debug_tuple("Static").field(path).finish(),
            Self::Sync(_) => f.write_str("Sync(..)"),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// A named metadata field of a history collection
#[derive(Debug, Clone)]
pub struct MetadataField {
    pub name: String,
    pub rule: DerivationRule,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, rule: DerivationRule) -> Self {
        Self {
            name: name.into(),
            rule,
        }
    }
}

/// Apply the static and sync rules to a record about to be stored
///
/// A failing rule is logged and its field omitted; the other fields are
/// still applied. A static rule whose path is absent sets nothing.
pub fn apply_sync(fields: &[MetadataField], ctx: &DeriveContext, record: &mut AuditRecord) {
    for field in fields {
        let value = match &field.rule {
            DerivationRule::Static(path) => match &record.d {
                Value::Object(payload) => lookup(payload, path).cloned(),
                _ => None,
            },
            DerivationRule::Sync(derive) => match derive(ctx, &record.d) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(
                        collection = %ctx.collection,
                        field = %field.name,
                        error = %e,
                        "metadata derivation failed; field omitted"
                    );
                    None
                }
            },
            DerivationRule::Async(_) => None,
        };

        if let Some(value) = value {
            record.metadata.insert(field.name.clone(), value);
        }
    }
}

/// Compute the async fields of a stored record
///
/// Returns whether at least one field changed value. Failing rules are
/// logged and leave their field untouched.
pub async fn apply_async(
    fields: &[MetadataField],
    ctx: &DeriveContext,
    record: &mut AuditRecord,
) -> bool {
    let mut modified = false;

    for field in fields {
        let DerivationRule::Async(derive) = &field.rule else {
            continue;
        };

        match derive.derive(ctx.clone(), record.d.clone()).await {
            Ok(value) => {
                if record.metadata.get(&field.name) != Some(&value) {
                    record.metadata.insert(field.name.clone(), value);
                    modified = true;
                }
            }
            Err(e) => {
                tracing::warn!(
                    collection = %ctx.collection,
                    field = %field.name,
                    error = %e,
                    "async metadata derivation failed"
                );
            }
        }
    }

    modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HistoryError;
    use serde_json::json;

    fn record() -> AuditRecord {
        AuditRecord::update(json!({"_id": 1, "title": "Title test", "author": {"name": "ann"}}))
    }

    fn ctx(record: &AuditRecord) -> DeriveContext {
        DeriveContext::for_record("posts_history", record)
    }

    fn fields() -> Vec<MetadataField> {
        vec![
            MetadataField::new("title", DerivationRule::field("title")),
            MetadataField::new("author", DerivationRule::field("author.name")),
            MetadataField::new(
                "titleFunc",
                DerivationRule::sync(|_, d| Ok(d["title"].clone())),
            ),
            MetadataField::new(
                "titleAsync",
                DerivationRule::async_fn(|_, d| async move {
                    Ok::<_, HistoryError>(d["title"].clone())
                }),
            ),
        ]
    }

    #[test]
    fn test_rule_kinds() {
        let kinds: Vec<_> = fields().iter().map(|f| f.rule.kind()).collect();
        assert_eq!(
            kinds,
            vec![RuleKind::Static, RuleKind::Static, RuleKind::Sync, RuleKind::Async]
        );
    }

    #[test]
    fn test_sync_rules_skip_async_fields() {
        let mut record = record();
        let ctx = ctx(&record);
        apply_sync(&fields(), &ctx, &mut record);

        assert_eq!(record.metadata.get("title"), Some(&json!("Title test")));
        assert_eq!(record.metadata.get("author"), Some(&json!("ann")));
        assert_eq!(record.metadata.get("titleFunc"), Some(&json!("Title test")));
        assert!(record.metadata.get("titleAsync").is_none());
    }

    #[test]
    fn test_failing_rule_is_omitted() {
        let fields = vec![
            MetadataField::new(
                "broken",
                DerivationRule::sync(|_, _| Err(HistoryError::Validation("nope".into()))),
            ),
            MetadataField::new("title", DerivationRule::field("title")),
            MetadataField::new("missing", DerivationRule::field("nothing.here")),
        ];
        let mut record = record();
        let ctx = ctx(&record);
        apply_sync(&fields, &ctx, &mut record);

        assert!(record.metadata.get("broken").is_none());
        assert!(record.metadata.get("missing").is_none());
        assert_eq!(record.metadata.get("title"), Some(&json!("Title test")));
    }

    #[test]
    fn test_context_reaches_sync_rule() {
        let fields = vec![MetadataField::new(
            "op",
            DerivationRule::sync(|ctx, _| Ok(json!(format!("{}:{}", ctx.collection, ctx.operation.code())))),
        )];
        let mut record = record();
        let ctx = ctx(&record);
        apply_sync(&fields, &ctx, &mut record);

        assert_eq!(record.metadata.get("op"), Some(&json!("posts_history:u")));
    }

    #[tokio::test]
    async fn test_async_rules_report_modification_once() {
        let mut record = record();
        let ctx = ctx(&record);

        assert!(apply_async(&fields(), &ctx, &mut record).await);
        assert_eq!(record.metadata.get("titleAsync"), Some(&json!("Title test")));
        assert!(record.metadata.get("title").is_none());

        assert!(!apply_async(&fields(), &ctx, &mut record).await);
    }

    #[tokio::test]
    async fn test_failing_async_rule_leaves_record_untouched() {
        let fields = vec![MetadataField::new(
            "late",
            DerivationRule::async_fn(|_, _| async { Err::<Value, _>(HistoryError::Storage("down".into())) }),
        )];
        let mut record = record();
        let ctx = ctx(&record);

        assert!(!apply_async(&fields, &ctx, &mut record).await);
        assert!(record.metadata.is_empty());
    }
}
