use std::time::Duration;

use ragline_core::KvCache;
use ragline_embed::{MemoryCache, NoopCache};

#[tokio::test]
async fn entries_expire_after_ttl() {
    let cache = MemoryCache::new(10);
    cache.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(30)).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn full_cache_evicts_entry_closest_to_expiry() {
    let cache = MemoryCache::new(2);
    cache.set_with_ttl("short", vec![1], Duration::from_secs(10)).await.unwrap();
    cache.set_with_ttl("long", vec![2], Duration::from_secs(100)).await.unwrap();
    cache.set_with_ttl("new", vec![3], Duration::from_secs(50)).await.unwrap();

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("short").await.unwrap(), None);
    assert_eq!(cache.get("long").await.unwrap(), Some(vec![2]));
    assert_eq!(cache.get("new").await.unwrap(), Some(vec![3]));
}

#[tokio::test]
async fn delete_removes_entry() {
    let cache = MemoryCache::new(10);
    cache.set_with_ttl("k", vec![1], Duration::from_secs(10)).await.unwrap();
    cache.delete("k").await.unwrap();
    assert!(cache.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn noop_cache_never_hits() {
    let cache = NoopCache;
    cache.set_with_ttl("k", vec![1], Duration::from_secs(10)).await.unwrap();
    assert!(cache.get("k").await.unwrap().is_none());
}
