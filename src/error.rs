//! Domain error taxonomy.
//!
//! Application plumbing uses `color_eyre::Result`; these variants are the
//! failures callers need to tell apart, recovered with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlightError {
  #[error("upstream request failed: {0}")]
  Upstream(String),

  #[error("upstream returned status {status}: {message}")]
  UpstreamStatus { status: u16, message: String },

  #[error("invalid airport code: {0:?}")]
  InvalidAirport(String),

  #[error("flight {flight_iata} already stored: {detail}")]
  ConstraintConflict { flight_iata: String, detail: String },
}
