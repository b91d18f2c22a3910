mod common;

use common::{doc, flaky_posts, post};
use doc_history::audit::AuditRecord;
use doc_history::{
    DocumentStore, Filter, FindAndModify, HistoryBackend, HistoryOptions, Operation, Update,
};
use serde_json::{json, Value};

async fn history_count(store: &common::FlakyStore) -> usize {
    store
        .inner()
        .records("posts_history", &Filter::all())
        .await
        .unwrap()
        .len()
}

async fn update_records(store: &common::FlakyStore) -> Vec<AuditRecord> {
    store
        .inner()
        .records("posts_history", &Filter::eq("o", "u"))
        .await
        .unwrap()
}

async fn stored_title(store: &common::FlakyStore, id: Value) -> Value {
    store
        .inner()
        .find_one("posts", &Filter::by_id(id))
        .await
        .unwrap()
        .unwrap()["title"]
        .clone()
}

#[tokio::test]
async fn test_persist_failure_keeps_primary_result() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    store.fail_history(true);

    let stored = posts.insert_one(post()).await.unwrap();
    assert!(store
        .inner()
        .find_one("posts", &Filter::by_id(stored["_id"].clone()))
        .await
        .unwrap()
        .is_some());
    assert_eq!(history_count(&store).await, 0);

    let outcome = posts
        .update_many(&Filter::all(), &Update::set("title", "x"))
        .await
        .unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(posts.delete_many(&Filter::all()).await.unwrap().deleted, 1);
    assert_eq!(history_count(&store).await, 0);
}

#[tokio::test]
async fn test_persist_failure_surfaces_in_strict_mode() {
    let (store, posts) = flaky_posts(HistoryOptions::new().strict(true));
    store.fail_history(true);

    let err = posts.insert_one(post()).await.unwrap_err();
    assert!(err.is_persist());

    // The primary insert has already committed
    assert_eq!(store.inner().count("posts").unwrap(), 1);
}

#[tokio::test]
async fn test_capture_failure_skips_audit() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    let stored = posts.insert_one(post()).await.unwrap();
    store.fail_reads(true);

    let outcome = posts
        .update_one(&Filter::by_id(stored["_id"].clone()), &Update::set("title", "changed"))
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);

    let outcome = posts.delete_one(&Filter::all()).await.unwrap();
    assert_eq!(outcome.deleted, 1);

    // Only the insert was recorded
    assert_eq!(history_count(&store).await, 1);
}

#[tokio::test]
async fn test_capture_failure_aborts_strict_mutation() {
    let (store, posts) = flaky_posts(HistoryOptions::new().strict(true));
    let stored = posts.insert_one(post()).await.unwrap();
    store.fail_reads(true);

    let err = posts
        .update_one(&Filter::by_id(stored["_id"].clone()), &Update::set("title", "changed"))
        .await
        .unwrap_err();
    assert!(err.is_capture());

    store.fail_reads(false);
    let current = store
        .inner()
        .find_one("posts", &Filter::all())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current["title"], stored["title"]);
}

#[tokio::test]
async fn test_find_one_and_update_passes_through_without_capture() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    posts.insert_one(post()).await.unwrap();
    store.fail_reads(true);

    let before = posts
        .find_one_and_update(
            &Filter::all(),
            &Update::set("title", "changed"),
            FindAndModify::before(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before["title"], serde_json::json!("Title test"));
    assert_eq!(history_count(&store).await, 1);
}

#[tokio::test]
async fn test_enrich_failure_is_reported() {
    let (store, posts) = flaky_posts(HistoryOptions::new().metadata(
        "late",
        doc_history::DerivationRule::async_fn(|_ctx, _payload| async {
            Ok::<_, doc_history::HistoryError>(serde_json::json!(1))
        }),
    ));
    posts.insert_one(post()).await.unwrap();

    let history = posts.history().await.unwrap();
    let mut record = history.find_one(&Filter::all()).await.unwrap().unwrap();
    store.fail_history(true);

    let err = history.enrich(&mut record).await.unwrap_err();
    assert!(err.is_persist());
}

#[tokio::test]
async fn test_save_returns_new_state_when_refetch_fails() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    posts
        .insert_one(doc(json!({"_id": 1, "title": "old"})))
        .await
        .unwrap();
    store.fail_reads_after(1);

    let saved = posts
        .save(doc(json!({"_id": 1, "title": "new"})))
        .await
        .unwrap();
    assert_eq!(saved["title"], json!("new"));
    assert_eq!(stored_title(&store, json!(1)).await, json!("new"));

    // The update could not be audited
    assert_eq!(history_count(&store).await, 1);
}

#[tokio::test]
async fn test_save_refetch_failure_surfaces_in_strict_mode() {
    let (store, posts) = flaky_posts(HistoryOptions::new().strict(true));
    posts
        .insert_one(doc(json!({"_id": 1, "title": "old"})))
        .await
        .unwrap();
    store.fail_reads_after(1);

    let err = posts
        .save(doc(json!({"_id": 1, "title": "new"})))
        .await
        .unwrap_err();
    assert!(err.is_capture());
    assert_eq!(stored_title(&store, json!(1)).await, json!("new"));
}

#[tokio::test]
async fn test_save_of_vanished_document_records_prior_state() {
    let (store, posts) = flaky_posts(HistoryOptions::new().diff_only(true));
    let old = posts
        .insert_one(doc(json!({"_id": 1, "title": "old"})))
        .await
        .unwrap();
    store.vanish_after(1);

    let saved = posts
        .save(doc(json!({"_id": 1, "title": "new"})))
        .await
        .unwrap();
    assert_eq!(saved["title"], json!("new"));

    let updates = update_records(&store).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].d, Value::Object(old));
}

#[tokio::test]
async fn test_update_one_of_vanished_document_records_prior_state() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    let stored = posts.insert_one(post()).await.unwrap();
    let id = stored["_id"].clone();
    let before = store
        .inner()
        .find_one("posts", &Filter::by_id(id.clone()))
        .await
        .unwrap()
        .unwrap();
    store.vanish_after(1);

    let outcome = posts
        .update_one(&Filter::by_id(id.clone()), &Update::set("title", "changed"))
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);
    assert_eq!(stored_title(&store, id).await, json!("changed"));

    let updates = update_records(&store).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].o, Operation::Update);
    assert_eq!(updates[0].d, Value::Object(before));
}

#[tokio::test]
async fn test_update_many_of_vanished_documents_writes_one_batch() {
    let (store, posts) = flaky_posts(HistoryOptions::new());
    posts.insert_one(post()).await.unwrap();
    posts.insert_one(post()).await.unwrap();
    let before = store.inner().find("posts", &Filter::all()).await.unwrap();
    assert_eq!(store.batches(), 0);

    // The stash read succeeds; the re-fetch finds nothing
    store.vanish_after(1);
    let outcome = posts
        .update_many(&Filter::all(), &Update::set("title", "changed"))
        .await
        .unwrap();
    assert_eq!(outcome.matched, 2);
    assert_eq!(store.batches(), 1);

    let updates = update_records(&store).await;
    assert_eq!(updates.len(), 2);
    for old in before {
        assert!(updates.iter().any(|r| r.d == Value::Object(old.clone())));
    }
}
