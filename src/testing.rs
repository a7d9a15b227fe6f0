//! Fixtures shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::error::FlightError;
use crate::flights::client::FlightSource;
use crate::flights::types::{Direction, FlightRecord};

/// A scheduled leg with no gate or status information yet.
pub fn flight(code: &str, dep: &str, arr: &str, dep_time: &str, arr_time: &str) -> FlightRecord {
  FlightRecord {
    id: None,
    flight_iata: code.to_string(),
    flight_number: Some(code.trim_start_matches(|c: char| c.is_ascii_alphabetic()).to_string()),
    airline_iata: Some(code.chars().take(2).collect()),
    dep_iata: dep.to_string(),
    dep_terminal: None,
    dep_gate: None,
    dep_time: Some(dep_time.to_string()),
    dep_actual: None,
    arr_iata: arr.to_string(),
    arr_terminal: None,
    arr_gate: None,
    arr_time: Some(arr_time.to_string()),
    arr_actual: None,
    status: Some("scheduled".to_string()),
    duration: None,
    delayed: None,
  }
}

/// The record as the upstream API would send it.
pub fn raw(record: &FlightRecord) -> Value {
  serde_json::to_value(record).expect("flight record serializes")
}

/// Upstream stand-in serving fixed snapshots per (direction, airport).
#[derive(Default)]
pub struct ScriptedSource {
  snapshots: Mutex<HashMap<(Direction, String), Vec<Value>>>,
  calls: AtomicUsize,
  failing: AtomicBool,
  delay: Option<Duration>,
}

impl ScriptedSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every fetch sleeps for `delay` before answering.
  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  pub fn set(&self, direction: Direction, airport: &str, records: Vec<Value>) {
    self
      .snapshots
      .lock()
      .unwrap()
      .insert((direction, airport.to_string()), records);
  }

  pub fn set_flights(&self, direction: Direction, airport: &str, records: &[FlightRecord]) {
    self.set(direction, airport, records.iter().map(raw).collect());
  }

  pub fn fail(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl FlightSource for ScriptedSource {
  async fn fetch(&self, direction: Direction, airport: &str) -> Result<Vec<Value>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.failing.load(Ordering::SeqCst) {
      return Err(FlightError::Upstream("connection reset".to_string()).into());
    }
    Ok(
      self
        .snapshots
        .lock()
        .unwrap()
        .get(&(direction, airport.to_string()))
        .cloned()
        .unwrap_or_default(),
    )
  }
}

/// Cache backend whose every call fails, as with Redis down.
pub struct UnreachableCache;

#[async_trait]
impl CacheStore for UnreachableCache {
  async fn get(&self, _key: &str) -> Result<Option<String>> {
    Err(eyre!("connection refused"))
  }

  async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
    Err(eyre!("connection refused"))
  }

  async fn delete(&self, _key: &str) -> Result<()> {
    Err(eyre!("connection refused"))
  }

  async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
    Err(eyre!("connection refused"))
  }

  async fn delete_if_equals(&self, _key: &str, _expected: &str) -> Result<bool> {
    Err(eyre!("connection refused"))
  }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  check()
}
