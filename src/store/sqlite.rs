//! SQLite-backed flight store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::FlightError;
use crate::flights::types::{Direction, FlightKey, FlightRecord};

use super::{FlightRepository, InsertReport};

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const CODES_PER_QUERY: usize = 500;

/// Schema for the schedule table.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS airline_schedule (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_iata TEXT NOT NULL,
    flight_number TEXT,
    airline_iata TEXT,
    dep_iata TEXT NOT NULL,
    dep_terminal TEXT,
    dep_gate TEXT,
    dep_time TEXT,
    dep_actual TEXT,
    arr_iata TEXT NOT NULL,
    arr_terminal TEXT,
    arr_gate TEXT,
    arr_time TEXT,
    arr_actual TEXT,
    status TEXT,
    duration INTEGER,
    delayed INTEGER,
    CONSTRAINT unique_departure UNIQUE (flight_iata, dep_time),
    CONSTRAINT unique_arrival UNIQUE (flight_iata, arr_time)
);

CREATE INDEX IF NOT EXISTS idx_dep_iata ON airline_schedule(dep_iata);
CREATE INDEX IF NOT EXISTS idx_arr_iata ON airline_schedule(arr_iata);
"#;

const COLUMNS: &str = "id, flight_iata, flight_number, airline_iata, \
   dep_iata, dep_terminal, dep_gate, dep_time, dep_actual, \
   arr_iata, arr_terminal, arr_gate, arr_time, arr_actual, \
   status, duration, delayed";

pub struct SqliteFlightStore {
  conn: Mutex<Connection>,
}

impl SqliteFlightStore {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open flight store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
  ) -> Result<Vec<FlightRecord>> {
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records = stmt
      .query_map(params, row_to_record)
      .map_err(|e| eyre!("Failed to query flights: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read flight row: {}", e))?;

    Ok(records)
  }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FlightRecord> {
  Ok(FlightRecord {
    id: row.get(0)?,
    flight_iata: row.get(1)?,
    flight_number: row.get(2)?,
    airline_iata: row.get(3)?,
    dep_iata: row.get(4)?,
    dep_terminal: row.get(5)?,
    dep_gate: row.get(6)?,
    dep_time: row.get(7)?,
    dep_actual: row.get(8)?,
    arr_iata: row.get(9)?,
    arr_terminal: row.get(10)?,
    arr_gate: row.get(11)?,
    arr_time: row.get(12)?,
    arr_actual: row.get(13)?,
    status: row.get(14)?,
    duration: row.get(15)?,
    delayed: row.get(16)?,
  })
}

/// Insert one row, turning unique-constraint failures into
/// [`FlightError::ConstraintConflict`].
fn insert_row(tx: &Transaction<'_>, record: &FlightRecord) -> Result<()> {
  let result = tx.execute(
    "INSERT INTO airline_schedule (flight_iata, flight_number, airline_iata,
       dep_iata, dep_terminal, dep_gate, dep_time, dep_actual,
       arr_iata, arr_terminal, arr_gate, arr_time, arr_actual,
       status, duration, delayed)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    params![
      record.flight_iata,
      record.flight_number,
      record.airline_iata,
      record.dep_iata,
      record.dep_terminal,
      record.dep_gate,
      record.dep_time,
      record.dep_actual,
      record.arr_iata,
      record.arr_terminal,
      record.arr_gate,
      record.arr_time,
      record.arr_actual,
      record.status,
      record.duration,
      record.delayed,
    ],
  );

  match result {
    Ok(_) => Ok(()),
    Err(rusqlite::Error::SqliteFailure(err, detail)) if err.code == ErrorCode::ConstraintViolation => {
      Err(
        FlightError::ConstraintConflict {
          flight_iata: record.flight_iata.clone(),
          detail: detail.unwrap_or_else(|| err.to_string()),
        }
        .into(),
      )
    }
    Err(e) => Err(eyre!("Failed to insert flight {}: {}", record.flight_iata, e)),
  }
}

fn require_id(record: &FlightRecord) -> Result<i64> {
  record
    .id
    .ok_or_else(|| eyre!("Flight {} has no row id", record.flight_iata))
}

impl FlightRepository for SqliteFlightStore {
  fn find_by_flight_codes(&self, codes: &HashSet<String>) -> Result<Vec<FlightRecord>> {
    if codes.is_empty() {
      return Ok(Vec::new());
    }

    let conn = self.lock()?;
    let codes: Vec<&String> = codes.iter().collect();
    let mut records = Vec::new();

    for chunk in codes.chunks(CODES_PER_QUERY) {
      let placeholders = vec!["?"; chunk.len()].join(", ");
      let sql = format!(
        "SELECT {} FROM airline_schedule WHERE flight_iata IN ({})",
        COLUMNS, placeholders
      );
      records.extend(Self::query_records(&conn, &sql, params_from_iter(chunk.iter()))?);
    }

    Ok(records)
  }

  fn find_by_key(&self, key: &FlightKey) -> Result<Option<FlightRecord>> {
    let conn = self.lock()?;
    let time_column = match key.direction {
      Direction::Departures => "dep_time",
      Direction::Arrivals => "arr_time",
    };
    // `IS` so that a missing scheduled time still matches its own row
    let sql = format!(
      "SELECT {} FROM airline_schedule WHERE flight_iata = ?1 AND {} IS ?2 LIMIT 1",
      COLUMNS, time_column
    );

    let mut records = Self::query_records(&conn, &sql, params![key.flight_iata, key.scheduled])?;
    Ok(records.pop())
  }

  fn find_by_airport(&self, direction: Direction, airport: &str) -> Result<Vec<FlightRecord>> {
    let conn = self.lock()?;
    let sql = match direction {
      Direction::Departures => format!(
        "SELECT {} FROM airline_schedule WHERE dep_iata = ?1 ORDER BY dep_time, flight_iata",
        COLUMNS
      ),
      Direction::Arrivals => format!(
        "SELECT {} FROM airline_schedule WHERE arr_iata = ?1 ORDER BY arr_time, flight_iata",
        COLUMNS
      ),
    };

    Self::query_records(&conn, &sql, params![airport])
  }

  fn insert_all(&self, records: &[FlightRecord]) -> Result<InsertReport> {
    let mut report = InsertReport::default();
    if records.is_empty() {
      return Ok(report);
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for record in records {
      match insert_row(&tx, record) {
        Ok(()) => report.inserted += 1,
        Err(e) => match e.downcast_ref::<FlightError>() {
          Some(FlightError::ConstraintConflict { .. }) => report.conflicts.push(record.clone()),
          _ => return Err(e),
        },
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(report)
  }

  fn update_all(&self, records: &[FlightRecord]) -> Result<usize> {
    if records.is_empty() {
      return Ok(0);
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut updated = 0;
    for record in records {
      let id = require_id(record)?;
      updated += tx
        .execute(
          "UPDATE airline_schedule
           SET dep_gate = ?1, dep_actual = ?2, arr_gate = ?3, arr_actual = ?4,
               status = ?5, delayed = ?6
           WHERE id = ?7",
          params![
            record.dep_gate,
            record.dep_actual,
            record.arr_gate,
            record.arr_actual,
            record.status,
            record.delayed,
            id,
          ],
        )
        .map_err(|e| eyre!("Failed to update flight {}: {}", record.flight_iata, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(updated)
  }

  fn delete_all(&self, records: &[FlightRecord]) -> Result<usize> {
    if records.is_empty() {
      return Ok(0);
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut deleted = 0;
    for record in records {
      let id = require_id(record)?;
      deleted += tx
        .execute("DELETE FROM airline_schedule WHERE id = ?1", params![id])
        .map_err(|e| eyre!("Failed to delete flight {}: {}", record.flight_iata, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::flight;

  fn store_with(records: &[FlightRecord]) -> SqliteFlightStore {
    let store = SqliteFlightStore::open_in_memory().unwrap();
    let report = store.insert_all(records).unwrap();
    assert_eq!(report.inserted, records.len());
    store
  }

  #[test]
  fn test_insert_assigns_ids_and_finds_by_airport() {
    let store = store_with(&[
      flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10"),
      flight("AA2", "JFK", "SFO", "2025-03-01 06:00", "2025-03-01 09:30"),
    ]);

    let departures = store.find_departures("SFO").unwrap();
    assert_eq!(departures.len(), 1);
    assert_eq!(departures[0].flight_iata, "UA1");
    assert!(departures[0].id.is_some());

    let arrivals = store.find_arrivals("SFO").unwrap();
    assert_eq!(arrivals.len(), 1);
    assert_eq!(arrivals[0].flight_iata, "AA2");
  }

  #[test]
  fn test_duplicate_insert_reports_conflict() {
    let record = flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10");
    let store = store_with(&[record.clone()]);

    let other = flight("UA9", "SFO", "LAX", "2025-03-01 10:00", "2025-03-01 11:30");
    let report = store.insert_all(&[record.clone(), other]).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.conflicts, vec![record]);
  }

  #[test]
  fn test_find_by_key_per_direction() {
    let store = store_with(&[flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10")]);
    let record = flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10");

    let by_dep = store.find_by_key(&record.key(Direction::Departures)).unwrap();
    let by_arr = store.find_by_key(&record.key(Direction::Arrivals)).unwrap();
    assert_eq!(by_dep.as_ref().map(|r| r.id), by_arr.as_ref().map(|r| r.id));

    let mut moved = record.clone();
    moved.dep_time = Some("2025-03-01 09:00".to_string());
    assert!(store.find_by_key(&moved.key(Direction::Departures)).unwrap().is_none());
  }

  #[test]
  fn test_find_by_flight_codes() {
    let store = store_with(&[
      flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10"),
      flight("UA1", "SFO", "SIN", "2025-03-02 07:05", "2025-03-03 14:10"),
      flight("DL5", "ATL", "SFO", "2025-03-01 06:00", "2025-03-01 08:45"),
    ]);

    let codes: HashSet<String> = ["UA1".to_string()].into_iter().collect();
    let found = store.find_by_flight_codes(&codes).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|r| r.flight_iata == "UA1"));

    assert!(store.find_by_flight_codes(&HashSet::new()).unwrap().is_empty());
  }

  #[test]
  fn test_update_touches_only_mutable_columns() {
    let store = store_with(&[flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10")]);
    let mut stored = store.find_departures("SFO").unwrap().remove(0);
    stored.dep_gate = Some("G1".to_string());
    stored.dep_terminal = Some("ignored".to_string());

    assert_eq!(store.update_all(&[stored.clone()]).unwrap(), 1);

    let reread = store.find_departures("SFO").unwrap().remove(0);
    assert_eq!(reread.dep_gate.as_deref(), Some("G1"));
    assert_eq!(reread.dep_terminal, None);
  }

  #[test]
  fn test_delete_by_id() {
    let store = store_with(&[
      flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10"),
      flight("UA9", "SFO", "LAX", "2025-03-01 10:00", "2025-03-01 11:30"),
    ]);
    let departures = store.find_departures("SFO").unwrap();
    assert_eq!(store.delete_all(&departures[..1]).unwrap(), 1);
    assert_eq!(store.find_departures("SFO").unwrap().len(), 1);
  }

  #[test]
  fn test_update_without_id_fails() {
    let store = SqliteFlightStore::open_in_memory().unwrap();
    let record = flight("UA1", "SFO", "SIN", "2025-03-01 07:05", "2025-03-02 14:10");
    assert!(store.update_all(&[record]).is_err());
  }
}
