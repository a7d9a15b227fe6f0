//! Token-based single-flight lock living in the cache backend.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::CacheStore;

/// Proof of ownership returned by [`DistributedLock::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
  fn generate() -> Self {
    Self(Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Mutual exclusion per key, expiring on its own if the holder dies.
///
/// Release is a compare-and-delete, so a holder whose lock already expired
/// cannot remove a lock someone else has since acquired.
#[derive(Clone)]
pub struct DistributedLock {
  store: Arc<dyn CacheStore>,
}

impl DistributedLock {
  pub fn new(store: Arc<dyn CacheStore>) -> Self {
    Self { store }
  }

  /// Take `key` for at most `ttl`. `None` means someone else holds it, or
  /// the backend could not be reached.
  pub async fn acquire(&self, key: &str, ttl: Duration) -> Option<LockToken> {
    let token = LockToken::generate();
    match self.store.set_nx_ex(key, token.as_str(), ttl).await {
      Ok(true) => Some(token),
      Ok(false) => None,
      Err(e) => {
        warn!(key, error = %e, "lock acquire failed");
        None
      }
    }
  }

  /// Release `key` if it is still held by `token`.
  pub async fn release(&self, key: &str, token: &LockToken) {
    match self.store.delete_if_equals(key, token.as_str()).await {
      Ok(true) => {}
      Ok(false) => debug!(key, "lock already expired or taken over"),
      Err(e) => warn!(key, error = %e, "lock release failed"),
    }
  }
}
