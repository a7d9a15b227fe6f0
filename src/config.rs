use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub airlabs: AirLabsConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub refresh: RefreshConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirLabsConfig {
  #[serde(default = "default_airlabs_url")]
  pub url: String,
  /// Client-side cap on upstream calls
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for AirLabsConfig {
  fn default() -> Self {
    Self {
      url: default_airlabs_url(),
      requests_per_minute: default_requests_per_minute(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  #[default]
  Redis,
  /// Process-local cache; the lock only excludes refreshes within this process
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: CacheBackend,
  #[serde(default = "default_redis_url")]
  pub redis_url: String,
  /// Entries younger than this are served without side effects
  #[serde(default = "default_fresh_secs")]
  pub fresh_secs: u64,
  /// Entries at least this old are evicted and rebuilt synchronously
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  #[serde(default = "default_lock_ttl_secs")]
  pub lock_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: CacheBackend::default(),
      redis_url: default_redis_url(),
      fresh_secs: default_fresh_secs(),
      ttl_secs: default_ttl_secs(),
      lock_ttl_secs: default_lock_ttl_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      workers: default_workers(),
      queue_capacity: default_queue_capacity(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// SQLite file (default: $XDG_DATA_HOME/flightboard/flights.db)
  pub path: Option<PathBuf>,
}

fn default_airlabs_url() -> String {
  "https://airlabs.co/api/v9".to_string()
}

fn default_requests_per_minute() -> u32 {
  30
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_redis_url() -> String {
  "redis://127.0.0.1:6379".to_string()
}

fn default_fresh_secs() -> u64 {
  30
}

fn default_ttl_secs() -> u64 {
  120
}

fn default_lock_ttl_secs() -> u64 {
  60
}

fn default_workers() -> usize {
  5
}

fn default_queue_capacity() -> usize {
  20
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./flightboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/flightboard/config.yaml
  ///
  /// Without any file the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("flightboard.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("flightboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to a mapping
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Reject freshness tiers that cannot be ordered.
  pub fn validate(&self) -> Result<()> {
    let cache = &self.cache;
    if cache.fresh_secs == 0 || cache.ttl_secs == 0 || cache.lock_ttl_secs == 0 {
      return Err(eyre!("cache.fresh_secs, cache.ttl_secs and cache.lock_ttl_secs must be positive"));
    }
    if cache.fresh_secs >= cache.ttl_secs {
      return Err(eyre!(
        "cache.fresh_secs ({}) must be below cache.ttl_secs ({})",
        cache.fresh_secs,
        cache.ttl_secs
      ));
    }
    if self.refresh.workers == 0 || self.refresh.queue_capacity == 0 {
      return Err(eyre!("refresh.workers and refresh.queue_capacity must be positive"));
    }
    Ok(())
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.airlabs.timeout_secs)
  }

  /// Where the SQLite store and log files live.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("flightboard"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("flights.db")),
    }
  }

  /// Get the AirLabs API key from environment variables.
  ///
  /// Checks FLIGHTBOARD_AIRLABS_KEY first, then AIRLABS_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("FLIGHTBOARD_AIRLABS_KEY")
      .or_else(|_| std::env::var("AIRLABS_API_KEY"))
      .map_err(|_| {
        eyre!("AirLabs API key not found. Set FLIGHTBOARD_AIRLABS_KEY or AIRLABS_API_KEY environment variable.")
      })
  }
}
