//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key-value backend the cache and the refresh lock live in.
///
/// Values are opaque strings; the typed envelope is handled by
/// [`CacheLayer`](super::CacheLayer).
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>>;

  /// Set `key` to `value`, expiring after `ttl`.
  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

  async fn delete(&self, key: &str) -> Result<()>;

  /// Set `key` only if it does not exist. Returns true if the value was set.
  async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

  /// Atomically delete `key` if its current value equals `expected`.
  /// Returns true if the key was deleted.
  async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;
}

/// Payload and write time, stored together under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry<T> {
  pub data: T,
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from a just-completed refresh.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Rebuilt synchronously from upstream
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past the fresh threshold; a background refresh was requested
  CacheStale,
}
