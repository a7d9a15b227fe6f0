//! Board rebuilds and the bounded pool that runs them in the background.

use color_eyre::Result;
use serde::de::IgnoredAny;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, DistributedLock, Freshness, Lookup};
use crate::store::FlightRepository;

use super::sync::Reconciler;
use super::types::{Direction, FlightBoard, FlightRecord};

pub fn cache_key(airport: &str) -> String {
  format!("FLIGHTS:{}", airport)
}

pub fn lock_key(airport: &str) -> String {
  format!("LOCK:{}", cache_key(airport))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
  Refreshed,
  /// Another refresh for the airport holds the lock
  Contended,
  Failed,
}

/// Reconciles an airport and republishes its board to the cache.
#[derive(Clone)]
pub struct BoardRefresher {
  reconciler: Reconciler,
  repo: Arc<dyn FlightRepository>,
  cache: Arc<CacheLayer>,
  lock: DistributedLock,
  lock_ttl: Duration,
}

impl BoardRefresher {
  pub fn new(
    reconciler: Reconciler,
    repo: Arc<dyn FlightRepository>,
    cache: Arc<CacheLayer>,
    lock: DistributedLock,
    lock_ttl: Duration,
  ) -> Self {
    Self {
      reconciler,
      repo,
      cache,
      lock,
      lock_ttl,
    }
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// Reconcile both directions, read the result back and cache it.
  ///
  /// Fails without touching the cache if either direction fails.
  pub async fn rebuild(&self, airport: &str) -> Result<FlightBoard> {
    self.reconciler.sync_airport(airport).await?;

    let board = FlightBoard {
      departures: read_back(self.repo.find_departures(airport), Direction::Departures, airport),
      arrivals: read_back(self.repo.find_arrivals(airport), Direction::Arrivals, airport),
    };
    self.cache.set_with_ttl(&cache_key(airport), &board).await;
    Ok(board)
  }

  /// Whether the cached board is still inside the fresh tier.
  pub async fn is_fresh(&self, airport: &str) -> bool {
    matches!(
      self.cache.lookup::<IgnoredAny>(&cache_key(airport)).await,
      Lookup::Hit {
        freshness: Freshness::Fresh,
        ..
      }
    )
  }

  /// Rebuild under the airport's lock. Never fails; outcomes are logged.
  pub async fn refresh_in_background(&self, airport: &str) -> RefreshOutcome {
    let key = lock_key(airport);
    let Some(token) = self.lock.acquire(&key, self.lock_ttl).await else {
      debug!(airport, "refresh already in progress");
      return RefreshOutcome::Contended;
    };

    let outcome = match self.rebuild(airport).await {
      Ok(board) => {
        info!(
          airport,
          departures = board.departures.len(),
          arrivals = board.arrivals.len(),
          "background refresh complete"
        );
        RefreshOutcome::Refreshed
      }
      Err(e) => {
        warn!(airport, error = %e, "background refresh failed");
        RefreshOutcome::Failed
      }
    };

    self.lock.release(&key, &token).await;
    outcome
  }
}

fn read_back(result: Result<Vec<FlightRecord>>, direction: Direction, airport: &str) -> Vec<FlightRecord> {
  result.unwrap_or_else(|e| {
    warn!(%direction, airport, error = %e, "reading back flights failed");
    Vec::new()
  })
}

/// Airports queued but not yet picked up by a worker.
type Pending = Arc<StdMutex<HashSet<String>>>;

fn pending_set(pending: &Pending) -> MutexGuard<'_, HashSet<String>> {
  pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Submission side of the refresh pool.
#[derive(Clone)]
pub struct RefreshQueue {
  tx: mpsc::Sender<String>,
  pending: Pending,
}

impl RefreshQueue {
  /// Enqueue a refresh without waiting. Returns false if it was dropped,
  /// including when the airport is already waiting in the queue.
  pub fn submit(&self, airport: &str) -> bool {
    if !pending_set(&self.pending).insert(airport.to_string()) {
      debug!(airport, "refresh already queued");
      return false;
    }

    let rejected = match self.tx.try_send(airport.to_string()) {
      Ok(()) => return true,
      Err(TrySendError::Full(_)) => "full",
      Err(TrySendError::Closed(_)) => "closed",
    };
    pending_set(&self.pending).remove(airport);
    debug!(airport, "refresh queue {}, dropping", rejected);
    false
  }
}

/// Fixed set of workers draining a bounded queue of airports.
pub struct RefreshPool {
  queue: RefreshQueue,
  stop: watch::Sender<bool>,
  workers: Vec<JoinHandle<()>>,
}

impl RefreshPool {
  pub fn spawn(refresher: BoardRefresher, workers: usize, capacity: usize) -> Self {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let pending = Pending::default();
    let (stop, _) = watch::channel(false);

    let workers = (0..workers.max(1))
      .map(|id| {
        let worker = Worker {
          id,
          refresher: refresher.clone(),
          rx: rx.clone(),
          pending: pending.clone(),
        };
        tokio::spawn(worker.run(stop.subscribe()))
      })
      .collect();

    Self {
      queue: RefreshQueue { tx, pending },
      stop,
      workers,
    }
  }

  pub fn queue(&self) -> RefreshQueue {
    self.queue.clone()
  }

  /// Close the queue, run every refresh already accepted, and wait for the
  /// workers to finish.
  pub async fn shutdown(self) {
    let _ = self.stop.send(true);
    for worker in self.workers {
      if let Err(e) = worker.await {
        warn!(error = %e, "refresh worker panicked");
      }
    }
  }
}

struct Worker {
  id: usize,
  refresher: BoardRefresher,
  rx: Arc<Mutex<mpsc::Receiver<String>>>,
  pending: Pending,
}

impl Worker {
  async fn run(self, mut stop: watch::Receiver<bool>) {
    loop {
      let airport = tokio::select! {
        _ = stop.changed() => break,
        next = self.next_job() => match next {
          Some(airport) => airport,
          None => break,
        },
      };
      self.handle(airport).await;
    }

    // Refuse new submissions, then finish what was accepted
    loop {
      let next = {
        let mut rx = self.rx.lock().await;
        rx.close();
        rx.try_recv()
      };
      match next {
        Ok(airport) => self.handle(airport).await,
        Err(_) => break,
      }
    }
    debug!(worker = self.id, "refresh worker stopped");
  }

  async fn next_job(&self) -> Option<String> {
    self.rx.lock().await.recv().await
  }

  async fn handle(&self, airport: String) {
    pending_set(&self.pending).remove(&airport);
    if self.refresher.is_fresh(&airport).await {
      debug!(worker = self.id, airport = %airport, "board already fresh, skipping refresh");
      return;
    }
    debug!(worker = self.id, airport = %airport, "refresh picked up");
    self.refresher.refresh_in_background(&airport).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FreshnessPolicy, MemoryCache};
  use crate::store::SqliteFlightStore;
  use crate::testing::{eventually, flight, ScriptedSource, UnreachableCache};

  struct Fixture {
    source: Arc<ScriptedSource>,
    refresher: BoardRefresher,
  }

  fn fixture(source: ScriptedSource) -> Fixture {
    let source = Arc::new(source);
    source.set_flights(
      Direction::Departures,
      "SFO",
      &[flight("UA1", "SFO", "LAX", "2025-03-01 07:00", "2025-03-01 08:30")],
    );
    source.set_flights(
      Direction::Arrivals,
      "SFO",
      &[flight("UA2", "LAX", "SFO", "2025-03-01 10:00", "2025-03-01 11:30")],
    );

    let store = Arc::new(SqliteFlightStore::open_in_memory().unwrap());
    let backend = Arc::new(MemoryCache::new());
    let refresher = BoardRefresher::new(
      Reconciler::new(source.clone(), store.clone()),
      store,
      Arc::new(CacheLayer::new(backend.clone(), FreshnessPolicy::default())),
      DistributedLock::new(backend),
      Duration::from_secs(60),
    );
    Fixture { source, refresher }
  }

  #[test]
  fn test_keys() {
    assert_eq!(cache_key("SFO"), "FLIGHTS:SFO");
    assert_eq!(lock_key("SFO"), "LOCK:FLIGHTS:SFO");
  }

  #[tokio::test]
  async fn test_rebuild_caches_reconciled_board() {
    let f = fixture(ScriptedSource::new());
    let board = f.refresher.rebuild("SFO").await.unwrap();
    assert_eq!(board.departures.len(), 1);
    assert_eq!(board.arrivals.len(), 1);
    assert!(board.departures[0].id.is_some());
    assert_eq!(f.source.calls(), 2);

    match f.refresher.cache().lookup::<FlightBoard>("FLIGHTS:SFO").await {
      Lookup::Hit { entry, freshness } => {
        assert_eq!(entry.data, board);
        assert_eq!(freshness, Freshness::Fresh);
      }
      Lookup::Miss => panic!("board was not cached"),
    }
  }

  #[tokio::test]
  async fn test_failed_rebuild_leaves_cache_alone() {
    let f = fixture(ScriptedSource::new());
    f.source.fail(true);
    assert!(f.refresher.rebuild("SFO").await.is_err());
    assert!(matches!(
      f.refresher.cache().lookup::<FlightBoard>("FLIGHTS:SFO").await,
      Lookup::Miss
    ));
  }

  #[tokio::test]
  async fn test_concurrent_triggers_single_refresh() {
    let f = fixture(ScriptedSource::with_delay(Duration::from_millis(50)));
    let triggers = (0..8).map(|_| {
      let refresher = f.refresher.clone();
      tokio::spawn(async move { refresher.refresh_in_background("SFO").await })
    });
    let outcomes: Vec<_> = futures::future::join_all(triggers)
      .await
      .into_iter()
      .map(|r| r.unwrap())
      .collect();

    let refreshed = outcomes
      .iter()
      .filter(|o| **o == RefreshOutcome::Refreshed)
      .count();
    assert_eq!(refreshed, 1);
    assert_eq!(outcomes.len() - refreshed, 7);
    assert!(outcomes
      .iter()
      .all(|o| matches!(o, RefreshOutcome::Refreshed | RefreshOutcome::Contended)));
    assert_eq!(f.source.calls(), 2);
  }

  #[tokio::test]
  async fn test_lock_released_on_every_path() {
    let f = fixture(ScriptedSource::new());
    f.source.fail(true);
    assert_eq!(f.refresher.refresh_in_background("SFO").await, RefreshOutcome::Failed);

    f.source.fail(false);
    assert_eq!(f.refresher.refresh_in_background("SFO").await, RefreshOutcome::Refreshed);
    assert_eq!(f.refresher.refresh_in_background("SFO").await, RefreshOutcome::Refreshed);
  }

  #[tokio::test]
  async fn test_unreachable_lock_skips_refresh() {
    let f = fixture(ScriptedSource::new());
    let refresher = BoardRefresher {
      lock: DistributedLock::new(Arc::new(UnreachableCache)),
      ..f.refresher.clone()
    };
    assert_eq!(refresher.refresh_in_background("SFO").await, RefreshOutcome::Contended);
    assert_eq!(f.source.calls(), 0);
  }

  #[tokio::test]
  async fn test_pool_runs_submitted_refreshes() {
    let f = fixture(ScriptedSource::new());
    let pool = RefreshPool::spawn(f.refresher.clone(), 5, 20);
    assert!(pool.queue().submit("SFO"));

    let source = f.source.clone();
    assert!(eventually(Duration::from_secs(2), || source.calls() == 2).await);
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn test_full_queue_drops_submissions() {
    let f = fixture(ScriptedSource::with_delay(Duration::from_millis(200)));
    let pool = RefreshPool::spawn(f.refresher.clone(), 1, 1);
    let queue = pool.queue();

    let accepted = ["SFO", "LAX", "JFK"]
      .iter()
      .filter(|airport| queue.submit(airport))
      .count();
    assert!((1..=2).contains(&accepted));
    pool.shutdown().await;
  }

  #[tokio::test]
  async fn test_repeated_submissions_collapse_to_one_refresh() {
    let f = fixture(ScriptedSource::with_delay(Duration::from_millis(20)));
    let pool = RefreshPool::spawn(f.refresher.clone(), 1, 20);
    let queue = pool.queue();

    let accepted = (0..10).filter(|_| queue.submit("SFO")).count();
    assert_eq!(accepted, 1);

    let source = f.source.clone();
    assert!(eventually(Duration::from_secs(2), || source.calls() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.source.calls(), 2);

    // Picked-up airports can be queued again
    f.refresher.cache().evict("FLIGHTS:SFO").await;
    assert!(queue.submit("SFO"));
    pool.shutdown().await;
    assert_eq!(f.source.calls(), 4);
  }

  #[tokio::test]
  async fn test_worker_skips_board_already_fresh() {
    let f = fixture(ScriptedSource::new());
    f.refresher.rebuild("SFO").await.unwrap();
    assert!(f.refresher.is_fresh("SFO").await);

    let pool = RefreshPool::spawn(f.refresher.clone(), 2, 4);
    assert!(pool.queue().submit("SFO"));
    pool.shutdown().await;
    assert_eq!(f.source.calls(), 2);
  }

  #[tokio::test]
  async fn test_shutdown_runs_accepted_refreshes() {
    let f = fixture(ScriptedSource::new());
    let pool = RefreshPool::spawn(f.refresher.clone(), 3, 4);
    let queue = pool.queue();
    assert!(queue.submit("SFO"));

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
      .await
      .expect("workers stop");
    assert_eq!(f.source.calls(), 2);
    assert!(f.refresher.is_fresh("SFO").await);
    assert!(!queue.submit("SFO"));
  }
}
