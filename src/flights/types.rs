use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::FlightError;

/// Which of an airport's two schedules a record was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Departures,
  Arrivals,
}

impl Direction {
  pub const BOTH: [Direction; 2] = [Direction::Departures, Direction::Arrivals];

  /// Query parameter the schedules endpoint filters on for this direction.
  pub fn filter_param(self) -> &'static str {
    match self {
      Direction::Departures => "dep_iata",
      Direction::Arrivals => "arr_iata",
    }
  }

  fn key_prefix(self) -> &'static str {
    match self {
      Direction::Departures => "DEP",
      Direction::Arrivals => "ARR",
    }
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Departures => f.write_str("departures"),
      Direction::Arrivals => f.write_str("arrivals"),
    }
  }
}

/// One scheduled flight leg as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
  /// Row id assigned by the persisted store; `None` for upstream records.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  pub flight_iata: String,
  pub flight_number: Option<String>,
  pub airline_iata: Option<String>,

  pub dep_iata: String,
  pub dep_terminal: Option<String>,
  pub dep_gate: Option<String>,
  pub dep_time: Option<String>,
  pub dep_actual: Option<String>,

  pub arr_iata: String,
  pub arr_terminal: Option<String>,
  pub arr_gate: Option<String>,
  pub arr_time: Option<String>,
  pub arr_actual: Option<String>,

  pub status: Option<String>,
  /// Block time in minutes
  pub duration: Option<i32>,
  /// Delay in minutes
  pub delayed: Option<i32>,
}

impl FlightRecord {
  /// Directional identity: flight code plus the scheduled time on that side.
  pub fn key(&self, direction: Direction) -> FlightKey {
    let scheduled = match direction {
      Direction::Departures => self.dep_time.clone(),
      Direction::Arrivals => self.arr_time.clone(),
    };
    FlightKey {
      direction,
      flight_iata: self.flight_iata.clone(),
      scheduled,
    }
  }

  /// SHA-256 over the fields upstream is allowed to change after creation.
  pub fn change_fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    for field in [
      self.dep_gate.as_deref(),
      self.dep_actual.as_deref(),
      self.arr_gate.as_deref(),
      self.arr_actual.as_deref(),
      self.status.as_deref(),
    ] {
      match field {
        Some(value) => {
          hasher.update([1u8]);
          hasher.update((value.len() as u64).to_le_bytes());
          hasher.update(value.as_bytes());
        }
        None => hasher.update([0u8]),
      }
    }
    match self.delayed {
      Some(minutes) => {
        hasher.update([1u8]);
        hasher.update(minutes.to_le_bytes());
      }
      None => hasher.update([0u8]),
    }
    hex::encode(hasher.finalize())
  }

  pub fn differs_from(&self, other: &FlightRecord) -> bool {
    self.change_fingerprint() != other.change_fingerprint()
  }

  /// Copy the mutable fields of `fresh` onto `self`. Identity, scheduled
  /// times and the row id are left alone.
  pub fn apply_changes(&mut self, fresh: &FlightRecord) {
    self.dep_gate = fresh.dep_gate.clone();
    self.dep_actual = fresh.dep_actual.clone();
    self.arr_gate = fresh.arr_gate.clone();
    self.arr_actual = fresh.arr_actual.clone();
    self.status = fresh.status.clone();
    self.delayed = fresh.delayed;
  }
}

/// Unique key of a record within one direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightKey {
  pub direction: Direction,
  pub flight_iata: String,
  pub scheduled: Option<String>,
}

impl fmt::Display for FlightKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}_{}",
      self.direction.key_prefix(),
      self.flight_iata,
      self.scheduled.as_deref().unwrap_or("null")
    )
  }
}

/// Cached payload for one airport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightBoard {
  pub departures: Vec<FlightRecord>,
  pub arrivals: Vec<FlightRecord>,
}

impl FlightBoard {
  pub fn is_empty(&self) -> bool {
    self.departures.is_empty() && self.arrivals.is_empty()
  }
}

/// Trim and upper-case an airport code, rejecting anything that is not a
/// short alphanumeric code.
pub fn normalize_airport(code: &str) -> Result<String, FlightError> {
  let code = code.trim().to_uppercase();
  if code.is_empty() || code.len() > 4 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
    return Err(FlightError::InvalidAirport(code));
  }
  Ok(code)
}
