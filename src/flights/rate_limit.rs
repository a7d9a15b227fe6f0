//! Client-side throttle for the AirLabs API.
//!
//! The free tier allows a small number of calls per minute; every upstream
//! request waits for a slot here before it is sent.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter =
  GovLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

#[derive(Debug, Clone)]
pub struct RateLimiter {
  limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
  /// Allow `per_minute` requests per minute, with bursts up to that size.
  pub fn per_minute(per_minute: u32) -> Self {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    Self {
      limiter: Arc::new(GovLimiter::direct(quota)),
    }
  }

  /// Wait until a request slot is available.
  pub async fn wait(&self) {
    self.limiter.until_ready().await;
  }

  /// Take a slot without waiting. Returns true if one was available.
  #[cfg(test)]
  pub fn try_acquire(&self) -> bool {
    self.limiter.check().is_ok()
  }
}
