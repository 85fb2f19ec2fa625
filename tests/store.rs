// tests/store.rs

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use nodevisor::store::{FileStore, IdempotencyFlag, KvStore, MemoryStore, StoreError};
use nodevisor_test_utils::builders::fast_retry;
use nodevisor_test_utils::fakes::FlakyStore;

#[tokio::test]
async fn file_store_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("flags.toml");

    let first = FileStore::new(&path);
    assert_eq!(first.get("etcd/initialized").await.unwrap(), None);
    first.put("etcd/initialized", "true").await.unwrap();
    first.put("machine/id", "abc123").await.unwrap();

    let second = FileStore::new(&path);
    assert_eq!(second.path(), path.as_path());
    assert_eq!(
        second.get("etcd/initialized").await.unwrap().as_deref(),
        Some("true")
    );
    assert_eq!(second.get("machine/id").await.unwrap().as_deref(), Some("abc123"));

    // No temp file is left behind.
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "{leftovers:?}");
}

#[tokio::test]
async fn corrupt_file_is_a_permanent_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flags.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    let store = FileStore::new(&path);
    let err = store.get("anything").await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn flag_does_not_retry_permanent_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flags.toml");
    std::fs::write(&path, "[[[").unwrap();

    let flag = IdempotencyFlag::new(
        "bootstrap/done",
        Arc::new(FileStore::new(&path)),
        fast_retry(Duration::from_secs(3600)),
    );
    let err = flag.is_set(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn transient_classification() {
    assert!(StoreError::NoLeader.is_transient());
    assert!(StoreError::Unavailable("connection refused".into()).is_transient());
    assert!(!StoreError::Corrupt("bad".into()).is_transient());
}

#[tokio::test(start_paused = true)]
async fn flag_retries_until_the_store_answers() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()).failing_first(5));
    let flag = IdempotencyFlag::new("k", store.clone(), fast_retry(Duration::from_secs(10)));
    let cancel = CancellationToken::new();

    assert!(!flag.is_set(&cancel).await.unwrap());
    assert_eq!(store.get_count(), 6);

    flag.set(&cancel).await.unwrap();
    assert!(flag.is_set(&cancel).await.unwrap());
    assert_eq!(store.value_of("k").as_deref(), Some("true"));
}

#[tokio::test(start_paused = true)]
async fn flag_gives_up_after_the_budget() {
    let store = Arc::new(FlakyStore::new(MemoryStore::new()).without_leader());
    let flag = IdempotencyFlag::new("k", store.clone(), fast_retry(Duration::from_secs(2)));

    let err = flag.is_set(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_exhausted());
    assert!(err.to_string().contains("no leader"), "{err}");
    assert!(store.get_count() > 100);
}

#[tokio::test]
async fn memory_store_round_trip() {
    let store = MemoryStore::new().with_entry("a", "1");
    assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.get("b").await.unwrap(), None);
    store.put("b", "2").await.unwrap();
    assert_eq!(store.value_of("b").as_deref(), Some("2"));
}
