//! Flight schedules: upstream client, reconciliation and the cached board.

pub mod api_types;
pub mod client;
pub mod gateway;
pub mod rate_limit;
pub mod refresh;
pub mod sync;
pub mod types;

pub use client::{AirLabsClient, FlightSource};
pub use gateway::FlightGateway;
pub use refresh::{BoardRefresher, RefreshPool};
pub use sync::Reconciler;
pub use types::{normalize_airport, Direction};
