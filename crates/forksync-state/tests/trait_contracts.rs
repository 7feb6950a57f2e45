//! Trait contract tests for KvStore.
//!
//! Every backend runs the same assertions; any conforming implementation
//! must pass these.

use std::time::Duration;

use forksync_state::fakes::MemoryKvStore;
use forksync_state::{FsKvStore, KvStore, StorageError};

async fn check_round_trip(store: &dyn KvStore) {
    store.put("repos", "octo/widgets", b"alpha", None).await.unwrap();
    let got = store.get("repos", "octo/widgets").await.unwrap();
    assert_eq!(got.as_deref(), Some(&b"alpha"[..]));
}

async fn check_namespaces_isolated(store: &dyn KvStore) {
    store.put("repos", "k", b"repo", None).await.unwrap();
    store.put("cache", "k", b"cache", None).await.unwrap();
    assert_eq!(store.get("repos", "k").await.unwrap().unwrap(), b"repo");
    assert_eq!(store.get("cache", "k").await.unwrap().unwrap(), b"cache");
}

async fn check_delete(store: &dyn KvStore) {
    store.put("repos", "gone", b"x", None).await.unwrap();
    store.delete("repos", "gone").await.unwrap();
    assert!(store.get("repos", "gone").await.unwrap().is_none());
    store.delete("repos", "gone").await.unwrap();
}

async fn check_list_sorted(store: &dyn KvStore) {
    for key in ["b/two", "a/one", "c/three"] {
        store.put("listing", key, b"v", None).await.unwrap();
    }
    let keys = store.list_keys("listing").await.unwrap();
    assert_eq!(keys, vec!["a/one", "b/two", "c/three"]);
}

async fn check_ttl_expiry(store: &dyn KvStore) {
    store
        .put("cache", "short", b"v", Some(Duration::from_millis(20)))
        .await
        .unwrap();
    store
        .put("cache", "long", b"v", Some(Duration::from_secs(3600)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store.get("cache", "short").await.unwrap().is_none());
    assert!(store.get("cache", "long").await.unwrap().is_some());
    assert_eq!(store.list_keys("cache").await.unwrap(), vec!["long"]);
}

async fn check_clear(store: &dyn KvStore) {
    store.put("scratch", "a", b"v", None).await.unwrap();
    store.put("keep", "a", b"v", None).await.unwrap();
    store.clear("scratch").await.unwrap();
    assert!(store.list_keys("scratch").await.unwrap().is_empty());
    assert_eq!(store.list_keys("keep").await.unwrap(), vec!["a"]);
}

async fn check_rejects_bad_namespace(store: &dyn KvStore) {
    let err = store.put("../escape", "k", b"v", None).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidNamespace { .. }));
}

async fn run_contract(store: &dyn KvStore) {
    check_round_trip(store).await;
    check_namespaces_isolated(store).await;
    check_delete(store).await;
    check_list_sorted(store).await;
    check_ttl_expiry(store).await;
    check_clear(store).await;
    check_rejects_bad_namespace(store).await;
}

#[tokio::test]
async fn memory_store_satisfies_contract() {
    let store = MemoryKvStore::new();
    run_contract(&store).await;
}

#[tokio::test]
async fn fs_store_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsKvStore::new(dir.path()).unwrap();
    run_contract(&store).await;
}
