//! Read path for airport boards with tiered caching.

use color_eyre::Result;
use tracing::debug;

use crate::cache::{CacheResult, Freshness, Lookup};

use super::refresh::{cache_key, BoardRefresher, RefreshQueue};
use super::types::{normalize_airport, FlightBoard};

/// Flight board lookups served from cache when possible.
///
/// Fresh entries are returned as-is, stale entries are returned while a
/// background refresh is queued, and misses or expired entries are rebuilt
/// before returning.
#[derive(Clone)]
pub struct FlightGateway {
  refresher: BoardRefresher,
  queue: RefreshQueue,
}

impl FlightGateway {
  pub fn new(refresher: BoardRefresher, queue: RefreshQueue) -> Self {
    Self { refresher, queue }
  }

  /// Departures and arrivals for `airport`, with where they came from.
  pub async fn get_flights(&self, airport: &str) -> Result<CacheResult<FlightBoard>> {
    let airport = normalize_airport(airport)?;
    let key = cache_key(&airport);

    match self.refresher.cache().lookup::<FlightBoard>(&key).await {
      Lookup::Hit {
        entry,
        freshness: Freshness::Fresh,
      } => {
        debug!(airport = %airport, "serving fresh board");
        return Ok(CacheResult::from_cache(entry.data, entry.cached_at, false));
      }
      Lookup::Hit {
        entry,
        freshness: Freshness::Stale,
      } => {
        debug!(airport = %airport, "serving stale board, refresh queued");
        self.queue.submit(&airport);
        return Ok(CacheResult::from_cache(entry.data, entry.cached_at, true));
      }
      Lookup::Hit {
        freshness: Freshness::Expired,
        ..
      } => {
        debug!(airport = %airport, "cached board expired");
        self.refresher.cache().evict(&key).await;
      }
      Lookup::Miss => debug!(airport = %airport, "no cached board"),
    }

    let board = self.refresher.rebuild(&airport).await?;
    Ok(CacheResult::from_network(board))
  }

  /// Drop the cached board for `airport`.
  pub async fn evict(&self, airport: &str) -> Result<()> {
    let airport = normalize_airport(airport)?;
    self.refresher.cache().evict(&cache_key(&airport)).await;
    Ok(())
  }
}
