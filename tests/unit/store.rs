//! Unit tests for the in-memory release store

use helm_operator::release::store::{is_not_found, StoreError};
use helm_operator::release::{MemoryStore, ReleaseStatusCode, ReleaseStore};

use crate::common::test_release;

#[tokio::test]
async fn test_create_and_get() {
    let store = MemoryStore::new();
    let release = test_release("foo-1", 1, "manifest", ReleaseStatusCode::Deployed);
    store.create(&release).await.unwrap();

    let fetched = store.get("foo-1", 1).await.unwrap();
    assert_eq!(fetched, release);
}

#[tokio::test]
async fn test_create_duplicate_version_fails() {
    let store = MemoryStore::new();
    let release = test_release("foo-1", 1, "manifest", ReleaseStatusCode::Deployed);
    store.create(&release).await.unwrap();

    let err = store.create(&release).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let store = MemoryStore::new();
    let err = store.get("foo-1", 1).await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_update_replaces_in_place() {
    let store = MemoryStore::new();
    let mut release = test_release("foo-1", 1, "manifest", ReleaseStatusCode::Deployed);
    store.create(&release).await.unwrap();

    release.info.status = ReleaseStatusCode::Superseded;
    store.update(&release).await.unwrap();

    let fetched = store.get("foo-1", 1).await.unwrap();
    assert_eq!(fetched.info.status, ReleaseStatusCode::Superseded);
}

#[tokio::test]
async fn test_update_missing_version_fails() {
    let store = MemoryStore::new();
    let release = test_release("foo-1", 1, "manifest", ReleaseStatusCode::Deployed);
    let err = store.update(&release).await.unwrap_err();
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_history_is_ascending_and_empty_for_unknown_name() {
    let store = MemoryStore::new();
    assert!(store.history("nope").await.unwrap().is_empty());

    for version in [3, 1, 2] {
        store
            .create(&test_release(
                "foo-1",
                version,
                "m",
                ReleaseStatusCode::Superseded,
            ))
            .await
            .unwrap();
    }
    let versions: Vec<u32> = store
        .history("foo-1")
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_deployed_picks_latest_deployed_version() {
    let store = MemoryStore::new();
    store
        .create(&test_release("foo-1", 1, "m1", ReleaseStatusCode::Superseded))
        .await
        .unwrap();
    store
        .create(&test_release("foo-1", 2, "m2", ReleaseStatusCode::Deployed))
        .await
        .unwrap();
    store
        .create(&test_release("foo-1", 3, "m3", ReleaseStatusCode::Failed))
        .await
        .unwrap();

    let deployed = store.deployed("foo-1").await.unwrap();
    assert_eq!(deployed.version, 2);
}

#[tokio::test]
async fn test_deployed_with_no_deployed_versions_is_not_found() {
    let store = MemoryStore::new();
    store
        .create(&test_release("foo-1", 1, "m", ReleaseStatusCode::Failed))
        .await
        .unwrap();

    let err = store.deployed("foo-1").await.unwrap_err();
    assert!(matches!(err, StoreError::NoDeployedReleases(_)));
    assert!(is_not_found(&err));
}

#[tokio::test]
async fn test_delete_removes_version() {
    let store = MemoryStore::new();
    store
        .create(&test_release("foo-1", 1, "m", ReleaseStatusCode::Deployed))
        .await
        .unwrap();

    let removed = store.delete("foo-1", 1).await.unwrap();
    assert_eq!(removed.version, 1);
    assert!(store.history("foo-1").await.unwrap().is_empty());

    let err = store.delete("foo-1", 1).await.unwrap_err();
    assert!(is_not_found(&err));
}

#[test]
fn test_not_found_predicate_matches_backend_message_substrings() {
    assert!(is_not_found(&StoreError::Backend(
        "release \"foo\" not found".to_string()
    )));
    assert!(is_not_found(&StoreError::Backend(
        "\"foo\" has no deployed releases".to_string()
    )));
    assert!(!is_not_found(&StoreError::Backend(
        "connection refused".to_string()
    )));
    assert!(!is_not_found(&StoreError::AlreadyExists));
}
