//! Serde-deserializable types matching AirLabs API responses.
//!
//! These types are separate from domain types so a single odd record can be
//! rejected without failing the whole snapshot.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::types::FlightRecord;

/// Envelope of the `/schedules` endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiSchedulesResponse {
  /// Absent when the filter matched nothing
  #[serde(default)]
  pub response: Option<Vec<Value>>,
  #[serde(default)]
  pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub code: Option<String>,
}

/// One schedule row as AirLabs sends it.
#[derive(Debug, Default, Deserialize)]
pub struct ApiFlight {
  #[serde(default, deserialize_with = "lenient_string")]
  pub flight_iata: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub flight_number: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub airline_iata: Option<String>,

  #[serde(default, deserialize_with = "lenient_string")]
  pub dep_iata: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub dep_terminal: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub dep_gate: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub dep_time: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub dep_actual: Option<String>,

  #[serde(default, deserialize_with = "lenient_string")]
  pub arr_iata: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub arr_terminal: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub arr_gate: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub arr_time: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub arr_actual: Option<String>,

  #[serde(default, deserialize_with = "lenient_string")]
  pub status: Option<String>,
  #[serde(default, deserialize_with = "lenient_minutes")]
  pub duration: Option<i32>,
  #[serde(default, deserialize_with = "lenient_minutes")]
  pub delayed: Option<i32>,
}

impl ApiFlight {
  /// Decode one raw record. `None` means the record is malformed: it does
  /// not decode, or it lacks the flight code or either airport.
  pub fn parse(raw: &Value) -> Option<FlightRecord> {
    let api: ApiFlight = serde_json::from_value(raw.clone()).ok()?;
    api.into_record()
  }

  pub fn into_record(self) -> Option<FlightRecord> {
    Some(FlightRecord {
      id: None,
      flight_iata: self.flight_iata?,
      flight_number: self.flight_number,
      airline_iata: self.airline_iata,
      dep_iata: self.dep_iata?,
      dep_terminal: self.dep_terminal,
      dep_gate: self.dep_gate,
      dep_time: self.dep_time,
      dep_actual: self.dep_actual,
      arr_iata: self.arr_iata?,
      arr_terminal: self.arr_terminal,
      arr_gate: self.arr_gate,
      arr_time: self.arr_time,
      arr_actual: self.arr_actual,
      status: self.status,
      duration: self.duration,
      delayed: self.delayed,
    })
  }
}

/// Accept strings or numbers; blank strings count as missing.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<Value> = Option::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
    Some(Value::Number(n)) => Some(n.to_string()),
    _ => None,
  })
}

/// Minutes arrive as integers, occasionally as floats or numeric strings.
fn lenient_minutes<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<Value> = Option::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::Number(n)) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .and_then(|m| i32::try_from(m).ok()),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}
