//! Persisted flight records.
//!
//! The reconciler and the gateway only see [`FlightRepository`]; the SQLite
//! implementation is injected at construction.

mod sqlite;

pub use sqlite::SqliteFlightStore;

use color_eyre::Result;
use std::collections::HashSet;

use crate::flights::types::{Direction, FlightKey, FlightRecord};

/// Outcome of a batched insert.
#[derive(Debug, Default)]
pub struct InsertReport {
  pub inserted: usize,
  /// Records rejected by a unique constraint; another writer got there first
  pub conflicts: Vec<FlightRecord>,
}

/// Storage contract for flight records.
///
/// Calls block the caller; implementations serialize access internally.
pub trait FlightRepository: Send + Sync {
  /// All records whose flight code is in `codes`, in either direction.
  fn find_by_flight_codes(&self, codes: &HashSet<String>) -> Result<Vec<FlightRecord>>;

  /// The record occupying `key`, if any.
  fn find_by_key(&self, key: &FlightKey) -> Result<Option<FlightRecord>>;

  /// Records scheduled out of (departures) or into (arrivals) `airport`.
  fn find_by_airport(&self, direction: Direction, airport: &str) -> Result<Vec<FlightRecord>>;

  /// Insert new records. Unique-constraint violations are reported in the
  /// result instead of failing the batch.
  fn insert_all(&self, records: &[FlightRecord]) -> Result<InsertReport>;

  /// Overwrite stored records by row id. Returns the number of rows touched.
  fn update_all(&self, records: &[FlightRecord]) -> Result<usize>;

  /// Delete stored records by row id. Returns the number of rows removed.
  fn delete_all(&self, records: &[FlightRecord]) -> Result<usize>;

  fn find_departures(&self, airport: &str) -> Result<Vec<FlightRecord>> {
    self.find_by_airport(Direction::Departures, airport)
  }

  fn find_arrivals(&self, airport: &str) -> Result<Vec<FlightRecord>> {
    self.find_by_airport(Direction::Arrivals, airport)
  }
}
