use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::FlightError;

use super::api_types::ApiSchedulesResponse;
use super::rate_limit::RateLimiter;
use super::types::Direction;

/// Upstream schedule feed.
///
/// Returns raw records; decoding and validation happen during reconciliation
/// so that one bad row does not discard the snapshot.
#[async_trait]
pub trait FlightSource: Send + Sync {
  async fn fetch(&self, direction: Direction, airport: &str) -> Result<Vec<Value>>;
}

/// AirLabs `/schedules` client
#[derive(Clone)]
pub struct AirLabsClient {
  client: reqwest::Client,
  base_url: String,
  api_key: String,
  limiter: RateLimiter,
}

impl AirLabsClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;

    let client = reqwest::Client::builder()
      .pool_max_idle_per_host(4)
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| FlightError::Upstream(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: config.airlabs.url.trim_end_matches('/').to_string(),
      api_key,
      limiter: RateLimiter::per_minute(config.airlabs.requests_per_minute),
    })
  }

  fn schedules_url(&self, direction: Direction, airport: &str) -> Result<Url> {
    let url = Url::parse_with_params(
      &format!("{}/schedules", self.base_url),
      &[
        ("api_key", self.api_key.as_str()),
        (direction.filter_param(), airport),
      ],
    )
    .map_err(|e| FlightError::Upstream(format!("invalid AirLabs url: {}", e)))?;
    Ok(url)
  }
}

#[async_trait]
impl FlightSource for AirLabsClient {
  async fn fetch(&self, direction: Direction, airport: &str) -> Result<Vec<Value>> {
    let url = self.schedules_url(direction, airport)?;

    self.limiter.wait().await;

    let resp = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| FlightError::Upstream(e.without_url().to_string()))?;

    let status = resp.status();
    if !status.is_success() {
      let message = resp.text().await.unwrap_or_default();
      return Err(
        FlightError::UpstreamStatus {
          status: status.as_u16(),
          message,
        }
        .into(),
      );
    }

    let body: ApiSchedulesResponse = resp
      .json()
      .await
      .map_err(|e| FlightError::Upstream(format!("failed to decode schedules: {}", e)))?;

    if let Some(err) = body.error {
      return Err(
        FlightError::Upstream(format!(
          "{} ({})",
          err.message,
          err.code.as_deref().unwrap_or("no code")
        ))
        .into(),
      );
    }

    let records = body.response.unwrap_or_default();
    debug!(%direction, airport, count = records.len(), "fetched schedules");
    Ok(records)
  }
}
