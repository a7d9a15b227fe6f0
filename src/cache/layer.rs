//! Cache layer that applies the freshness policy on top of a [`CacheStore`].

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{CacheStore, CachedEntry};

/// Age tier of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Younger than the fresh threshold
  Fresh,
  /// Past the fresh threshold but within the TTL
  Stale,
  /// At or past the TTL
  Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  pub fresh: Duration,
  pub ttl: Duration,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self {
      fresh: Duration::from_secs(30),
      ttl: Duration::from_secs(120),
    }
  }
}

impl FreshnessPolicy {
  pub fn new(fresh: Duration, ttl: Duration) -> Self {
    Self { fresh, ttl }
  }

  /// Classify an entry by age. Negative ages (clock skew) count as fresh.
  pub fn classify(&self, age: chrono::Duration) -> Freshness {
    let age = age.to_std().unwrap_or(Duration::ZERO);
    if age < self.fresh {
      Freshness::Fresh
    } else if age < self.ttl {
      Freshness::Stale
    } else {
      Freshness::Expired
    }
  }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup<T> {
  Miss,
  Hit {
    entry: CachedEntry<T>,
    freshness: Freshness,
  },
}

/// Typed, policy-aware view over a [`CacheStore`].
///
/// Every backend failure is logged and degrades to a miss or a skipped
/// write, so an unreachable cache means "always rebuild" rather than failed
/// requests.
pub struct CacheLayer {
  store: Arc<dyn CacheStore>,
  policy: FreshnessPolicy,
}

impl CacheLayer {
  pub fn new(store: Arc<dyn CacheStore>, policy: FreshnessPolicy) -> Self {
    Self { store, policy }
  }

  /// Read an entry and its write time. Unreadable entries count as absent.
  pub async fn get_with_timestamp<T: DeserializeOwned>(&self, key: &str) -> Option<CachedEntry<T>> {
    let raw = match self.store.get(key).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_str::<CachedEntry<T>>(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, error = %e, "corrupt cache entry, treating as miss");
        None
      }
    }
  }

  /// Look up `key` and classify it against the policy.
  pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
    match self.get_with_timestamp::<T>(key).await {
      Some(entry) => {
        let freshness = self.policy.classify(Utc::now() - entry.cached_at);
        Lookup::Hit { entry, freshness }
      }
      None => Lookup::Miss,
    }
  }

  /// Write `data` stamped with the current time, expiring after the TTL.
  pub async fn set_with_ttl<T: Serialize>(&self, key: &str, data: &T) {
    let entry = CachedEntry {
      data,
      cached_at: Utc::now(),
    };
    self.put_entry(key, &entry).await;
  }

  /// Write a pre-stamped entry. Payload and timestamp go out as one value.
  pub async fn put_entry<T: Serialize>(&self, key: &str, entry: &CachedEntry<T>) {
    let json = match serde_json::to_string(entry) {
      Ok(json) => json,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache entry");
        return;
      }
    };

    if let Err(e) = self.store.set_ex(key, &json, self.policy.ttl).await {
      warn!(key, error = %e, "cache write failed");
    }
  }

  pub async fn evict(&self, key: &str) {
    if let Err(e) = self.store.delete(key).await {
      warn!(key, error = %e, "cache delete failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCache;
  use crate::testing::UnreachableCache;

  fn layer() -> (Arc<MemoryCache>, CacheLayer) {
    let store = Arc::new(MemoryCache::new());
    let layer = CacheLayer::new(store.clone(), FreshnessPolicy::default());
    (store, layer)
  }

  #[test]
  fn test_classify_boundaries() {
    let policy = FreshnessPolicy::default();
    assert_eq!(policy.classify(chrono::Duration::seconds(0)), Freshness::Fresh);
    assert_eq!(policy.classify(chrono::Duration::seconds(29)), Freshness::Fresh);
    assert_eq!(policy.classify(chrono::Duration::seconds(30)), Freshness::Stale);
    assert_eq!(policy.classify(chrono::Duration::seconds(119)), Freshness::Stale);
    assert_eq!(policy.classify(chrono::Duration::seconds(120)), Freshness::Expired);
    assert_eq!(policy.classify(chrono::Duration::seconds(-5)), Freshness::Fresh);
  }

  #[tokio::test]
  async fn test_roundtrip_and_classify() {
    let (_, layer) = layer();
    layer.set_with_ttl("k", &vec![1, 2, 3]).await;

    match layer.lookup::<Vec<i32>>("k").await {
      Lookup::Hit { entry, freshness } => {
        assert_eq!(entry.data, vec![1, 2, 3]);
        assert_eq!(freshness, Freshness::Fresh);
      }
      Lookup::Miss => panic!("expected hit"),
    }
  }

  #[tokio::test]
  async fn test_backdated_entry_is_stale() {
    let (_, layer) = layer();
    let entry = CachedEntry {
      data: "x".to_string(),
      cached_at: Utc::now() - chrono::Duration::seconds(45),
    };
    layer.put_entry("k", &entry).await;

    match layer.lookup::<String>("k").await {
      Lookup::Hit { freshness, .. } => assert_eq!(freshness, Freshness::Stale),
      Lookup::Miss => panic!("expected hit"),
    }
  }

  #[tokio::test]
  async fn test_corrupt_entry_is_miss() {
    let (store, layer) = layer();
    store
      .set_ex("k", "not json", Duration::from_secs(60))
      .await
      .unwrap();
    assert!(matches!(layer.lookup::<String>("k").await, Lookup::Miss));
  }

  #[tokio::test]
  async fn test_evict() {
    let (_, layer) = layer();
    layer.set_with_ttl("k", &1).await;
    layer.evict("k").await;
    assert!(matches!(layer.lookup::<i32>("k").await, Lookup::Miss));
  }

  #[tokio::test]
  async fn test_unreachable_backend_degrades_to_miss() {
    let layer = CacheLayer::new(Arc::new(UnreachableCache), FreshnessPolicy::default());
    layer.set_with_ttl("k", &1).await;
    layer.evict("k").await;
    assert!(matches!(layer.lookup::<i32>("k").await, Lookup::Miss));
  }
}
