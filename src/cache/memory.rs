//! Process-local cache backend.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::traits::CacheStore;

struct Slot {
  value: String,
  expires_at: Instant,
}

/// In-memory [`CacheStore`] with per-key expiry.
///
/// Same contract as the Redis backend, but only visible to this process.
#[derive(Default)]
pub struct MemoryCache {
  slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Lock the map and drop anything already expired.
  fn live(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let now = Instant::now();
    slots.retain(|_, slot| slot.expires_at > now);
    Ok(slots)
  }
}

#[async_trait]
impl CacheStore for MemoryCache {
  async fn get(&self, key: &str) -> Result<Option<String>> {
    Ok(self.live()?.get(key).map(|slot| slot.value.clone()))
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    self.live()?.insert(
      key.to_string(),
      Slot {
        value: value.to_string(),
        expires_at: Instant::now() + ttl,
      },
    );
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.live()?.remove(key);
    Ok(())
  }

  async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
    let mut slots = self.live()?;
    if slots.contains_key(key) {
      return Ok(false);
    }
    slots.insert(
      key.to_string(),
      Slot {
        value: value.to_string(),
        expires_at: Instant::now() + ttl,
      },
    );
    Ok(true)
  }

  async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
    let mut slots = self.live()?;
    match slots.get(key) {
      Some(slot) if slot.value == expected => {
        slots.remove(key);
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}
