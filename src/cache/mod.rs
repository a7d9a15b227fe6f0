//! Caching layer shared by every reader of the flight board.
//!
//! This module provides:
//! - A key-value backend seam (`CacheStore`) with Redis and in-memory backends
//! - Payload + write-time entries stored as one value
//! - Fresh / stale / expired classification of entries by age
//! - A token-based lock so only one refresh per key runs at a time

mod layer;
mod lock;
mod memory;
mod redis_backend;
mod traits;

pub use layer::{CacheLayer, Freshness, FreshnessPolicy, Lookup};
pub use lock::DistributedLock;
pub use memory::MemoryCache;
pub use redis_backend::RedisCache;
pub use traits::{CacheResult, CacheSource, CacheStore, CachedEntry};
