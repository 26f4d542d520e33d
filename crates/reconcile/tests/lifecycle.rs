#![forbid(unsafe_code)]

use std::sync::Arc;

use kcr_core::{equivalent, AdapterError, ExternalId};
use kcr_kubehub::mock::MockCluster;
use kcr_reconcile::{AdapterConfig, Lifecycle, Reconciler, TrackedState};

const TOM: &str = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom"},"data":{"nothing":"toseehere"}}"#;

fn setup() -> (Arc<MockCluster>, Lifecycle) {
    let mock = MockCluster::new().with_kind("app.example", "v1", "Cat", "cats", true).into_arc();
    let lc = Lifecycle::new(Reconciler::new(mock.clients(), AdapterConfig::default()));
    (mock, lc)
}

#[tokio::test]
async fn create_tracks_id_and_observed_json() {
    let (_mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    assert_eq!(state.id.to_string(), "default/tom");
    let observed: serde_json::Value = serde_json::from_str(&state.json).unwrap();
    assert_eq!(observed["data"]["nothing"], "toseehere");
    assert!(observed["metadata"].get("namespace").is_none());
    assert!(equivalent(&state.json, TOM));
}

#[tokio::test]
async fn unchanged_update_skips_server_call() {
    let (mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    let with_stale_rv = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom","resourceVersion":"999"},"data":{"nothing":"toseehere"}}"#;
    let next = lc.update(&state, with_stale_rv).await.unwrap();
    assert_eq!(mock.calls().replace, 0);
    assert_eq!(next, state);
}

#[tokio::test]
async fn changed_update_hits_server_and_refreshes() {
    let (mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    let changed = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom"},"data":{"nothing":"nowyouseeme"}}"#;
    let next = lc.update(&state, changed).await.unwrap();
    assert_eq!(mock.calls().replace, 1);
    assert_eq!(next.id, state.id);
    let observed: serde_json::Value = serde_json::from_str(&next.json).unwrap();
    assert_eq!(observed["data"]["nothing"], "nowyouseeme");
}

#[tokio::test]
async fn read_drops_vanished_object() {
    let (mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    assert_eq!(lc.read(&state).await.unwrap(), Some(state.clone()));
    assert!(mock.remove_object("cats", Some("default"), "tom"));
    assert_eq!(lc.read(&state).await.unwrap(), None);
}

#[tokio::test]
async fn delete_is_not_idempotent_at_this_layer() {
    let (_mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    lc.delete(&state).await.unwrap();
    let err = lc.delete(&state).await.unwrap_err();
    assert!(err.is_not_found(), "err={}", err);
}

#[tokio::test]
async fn id_survives_default_namespace_change() {
    let (mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    // same cluster, different default; the stored id is not recomputed
    let other = Lifecycle::new(Reconciler::new(mock.clients(), AdapterConfig::default().with_default_namespace("elsewhere")));

    assert_eq!(other.read(&state).await.unwrap(), Some(state.clone()));
    let imported = other.import(state.id.clone(), TOM).await.unwrap();
    assert_eq!(imported, state);

    other.delete(&state).await.unwrap();
    assert!(mock.object("cats", Some("default"), "tom").is_none());
}

#[tokio::test]
async fn update_without_namespace_targets_tracked_namespace() {
    let (mock, lc) = setup();
    let in_pets = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom","namespace":"pets"},"data":{"nothing":"toseehere"}}"#;
    let state = lc.create(in_pets).await.unwrap();
    assert_eq!(state.id.to_string(), "pets/tom");

    let changed = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom"},"data":{"nothing":"nowyouseeme"}}"#;
    let next = lc.update(&state, changed).await.unwrap();
    assert_eq!(next.id, state.id);
    let stored = mock.object("cats", Some("pets"), "tom").unwrap();
    assert_eq!(stored["data"]["nothing"], "nowyouseeme");
    assert!(mock.object("cats", Some("default"), "tom").is_none());
    let observed: serde_json::Value = serde_json::from_str(&next.json).unwrap();
    assert!(observed["metadata"].get("namespace").is_none());
}

#[tokio::test]
async fn update_rejects_document_moved_to_another_namespace() {
    let (mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    let moved = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom","namespace":"pets"},"data":{"nothing":"nowyouseeme"}}"#;
    let err = lc.update(&state, moved).await.unwrap_err();
    assert!(matches!(err, AdapterError::Parse(_)), "err={}", err);
    assert_eq!(mock.calls().replace, 0);
}

#[tokio::test]
async fn import_rejects_mismatched_namespace() {
    let (mock, lc) = setup();
    lc.create(TOM).await.unwrap();
    let before = mock.calls();
    let in_pets = r#"{"apiVersion":"app.example/v1","kind":"Cat","metadata":{"name":"tom","namespace":"pets"}}"#;
    let err = lc.import(ExternalId::namespaced("default", "tom"), in_pets).await.unwrap_err();
    assert!(matches!(err, AdapterError::Parse(_)), "err={}", err);
    assert!(err.to_string().contains("metadata.namespace"), "err={}", err);
    assert_eq!(mock.calls(), before);
}

#[tokio::test]
async fn tracked_state_persists_id_as_string() {
    let (_mock, lc) = setup();
    let state = lc.create(TOM).await.unwrap();
    let saved = serde_json::to_value(&state).unwrap();
    assert_eq!(saved["id"], "default/tom");
    let back: TrackedState = serde_json::from_value(saved).unwrap();
    assert_eq!(back, state);
}

#[tokio::test]
async fn import_rejects_mismatched_name() {
    let (_mock, lc) = setup();
    lc.create(TOM).await.unwrap();
    let err = lc.import(ExternalId::namespaced("default", "garfield"), TOM).await.unwrap_err();
    assert!(matches!(err, AdapterError::Parse(_)), "err={}", err);
}

#[tokio::test]
async fn unparsable_state_is_a_parse_error() {
    let (_mock, lc) = setup();
    let state = TrackedState { id: ExternalId::namespaced("default", "tom"), json: "{broken".into() };
    let err = lc.read(&state).await.unwrap_err();
    assert!(matches!(err, AdapterError::Parse(_)), "err={}", err);
}
