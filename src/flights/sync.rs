//! Reconciliation of upstream schedule snapshots into the flight store.
//!
//! One call handles one (direction, airport) pair:
//! 1. Fetch the snapshot and decode it, dropping malformed rows
//! 2. Load stored records sharing the snapshot's flight codes
//! 3. Partition the snapshot into inserts, updates and no-ops by directional key
//! 4. Delete stored records for the airport that left the snapshot
//! 5. Apply the batches, recovering inserts that lost a race to another writer
//!
//! An empty snapshot leaves the store untouched: during an upstream outage
//! "no flights" is indistinguishable from "no answer".

use color_eyre::Result;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::FlightRepository;

use super::api_types::ApiFlight;
use super::client::FlightSource;
use super::types::{Direction, FlightKey, FlightRecord};

/// Counters for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub direction: Direction,
  pub airport: String,
  /// Raw records returned upstream
  pub fetched: usize,
  /// Records dropped for missing identity fields
  pub malformed: usize,
  /// Records repeating a key already seen in the same snapshot
  pub duplicates: usize,
  pub inserted: usize,
  pub updated: usize,
  pub deleted: usize,
  pub unchanged: usize,
  /// Inserts that hit a unique constraint and were folded into an update check
  pub conflicts_recovered: usize,
  /// Inserts that hit a unique constraint with no row under their own key
  pub conflicts_skipped: usize,
}

impl SyncReport {
  fn new(direction: Direction, airport: &str) -> Self {
    Self {
      direction,
      airport: airport.to_string(),
      fetched: 0,
      malformed: 0,
      duplicates: 0,
      inserted: 0,
      updated: 0,
      deleted: 0,
      unchanged: 0,
      conflicts_recovered: 0,
      conflicts_skipped: 0,
    }
  }

  /// Rows written to the store.
  pub fn writes(&self) -> usize {
    self.inserted + self.updated + self.deleted
  }
}

impl fmt::Display for SyncReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {}: fetched={} malformed={} duplicates={} inserted={} updated={} deleted={} unchanged={} conflicts={}/{}",
      self.airport,
      self.direction,
      self.fetched,
      self.malformed,
      self.duplicates,
      self.inserted,
      self.updated,
      self.deleted,
      self.unchanged,
      self.conflicts_recovered,
      self.conflicts_recovered + self.conflicts_skipped,
    )
  }
}

/// Diffs upstream snapshots against the store and applies the difference.
#[derive(Clone)]
pub struct Reconciler {
  source: Arc<dyn FlightSource>,
  repo: Arc<dyn FlightRepository>,
}

impl Reconciler {
  pub fn new(source: Arc<dyn FlightSource>, repo: Arc<dyn FlightRepository>) -> Self {
    Self { source, repo }
  }

  /// Reconcile both directions of `airport`, concurrently. Both must succeed.
  pub async fn sync_airport(&self, airport: &str) -> Result<(SyncReport, SyncReport)> {
    tokio::try_join!(
      self.sync(Direction::Departures, airport),
      self.sync(Direction::Arrivals, airport),
    )
  }

  pub async fn sync(&self, direction: Direction, airport: &str) -> Result<SyncReport> {
    let raw = self.source.fetch(direction, airport).await?;

    let mut report = SyncReport::new(direction, airport);
    report.fetched = raw.len();

    let mut seen = HashSet::with_capacity(raw.len());
    let mut snapshot: Vec<(FlightKey, FlightRecord)> = Vec::with_capacity(raw.len());
    for value in &raw {
      let Some(record) = ApiFlight::parse(value) else {
        report.malformed += 1;
        continue;
      };
      let key = record.key(direction);
      if seen.insert(key.clone()) {
        snapshot.push((key, record));
      } else {
        report.duplicates += 1;
      }
    }

    if report.malformed > 0 {
      warn!(%direction, airport, malformed = report.malformed, "dropped malformed upstream records");
    }

    if snapshot.is_empty() {
      debug!(%direction, airport, "empty snapshot, leaving store untouched");
      return Ok(report);
    }

    let codes: HashSet<String> = snapshot
      .iter()
      .map(|(_, record)| record.flight_iata.clone())
      .collect();
    let stored: HashMap<FlightKey, FlightRecord> =
      or_empty(self.repo.find_by_flight_codes(&codes), "flight-code lookup")
        .into_iter()
        .map(|record| (record.key(direction), record))
        .collect();

    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    for (key, fresh) in &snapshot {
      match stored.get(key) {
        None => to_insert.push(fresh.clone()),
        Some(current) if current.differs_from(fresh) => {
          let mut changed = current.clone();
          changed.apply_changes(fresh);
          to_update.push(changed);
        }
        Some(_) => report.unchanged += 1,
      }
    }

    let to_delete: Vec<FlightRecord> = or_empty(
      self.repo.find_by_airport(direction, airport),
      "airport lookup",
    )
    .into_iter()
    .filter(|record| !seen.contains(&record.key(direction)))
    .collect();

    // Deletes first so a rescheduled leg can take over its old unique slot
    report.deleted = self.repo.delete_all(&to_delete)?;
    report.updated = self.repo.update_all(&to_update)?;

    let inserted = self.repo.insert_all(&to_insert)?;
    report.inserted = inserted.inserted;

    let mut recovered = Vec::new();
    for fresh in inserted.conflicts {
      let key = fresh.key(direction);
      match self.repo.find_by_key(&key)? {
        Some(current) => {
          report.conflicts_recovered += 1;
          if current.differs_from(&fresh) {
            let mut changed = current;
            changed.apply_changes(&fresh);
            recovered.push(changed);
          } else {
            report.unchanged += 1;
          }
        }
        None => {
          // The other unique domain holds the row; that direction's own sync owns it
          debug!(%key, "insert conflicted on the opposite key, skipping");
          report.conflicts_skipped += 1;
        }
      }
    }
    report.updated += self.repo.update_all(&recovered)?;

    info!(
      %direction,
      airport,
      inserted = report.inserted,
      updated = report.updated,
      deleted = report.deleted,
      unchanged = report.unchanged,
      "sync complete"
    );
    Ok(report)
  }
}

/// Store reads feeding the diff degrade to empty: a missing stored set only
/// causes extra inserts (recovered as conflicts) and skipped deletes.
fn or_empty(result: Result<Vec<FlightRecord>>, what: &str) -> Vec<FlightRecord> {
  result.unwrap_or_else(|e| {
    warn!(error = %e, "{} failed, treating as empty", what);
    Vec::new()
  })
}
