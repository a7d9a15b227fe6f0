mod cache;
mod config;
mod error;
mod flights;
mod store;
#[cfg(test)]
mod testing;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{CacheLayer, CacheSource, CacheStore, DistributedLock, FreshnessPolicy, MemoryCache, RedisCache};
use config::{CacheBackend, Config};
use flights::{
  normalize_airport, AirLabsClient, BoardRefresher, Direction, FlightGateway, FlightSource,
  Reconciler, RefreshPool,
};
use store::{FlightRepository, SqliteFlightStore};

#[derive(Parser, Debug)]
#[command(name = "flightboard")]
#[command(about = "Airport departure and arrival boards backed by the AirLabs schedules API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/flightboard/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the departure and arrival board for an airport as JSON
  Board { airport: String },
  /// Reconcile an airport against upstream without going through the cache
  Sync {
    airport: String,
    #[arg(short, long, value_enum, default_value_t = DirectionArg::Both)]
    direction: DirectionArg,
  },
  /// Read the board repeatedly, logging which cache tier served each read
  Watch {
    airport: String,
    /// Seconds between reads
    #[arg(short, long, default_value_t = 10)]
    interval: u64,
  },
  /// Drop the cached board for an airport
  Evict { airport: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
  Departures,
  Arrivals,
  Both,
}

impl DirectionArg {
  fn directions(self) -> &'static [Direction] {
    match self {
      DirectionArg::Departures => &[Direction::Departures],
      DirectionArg::Arrivals => &[Direction::Arrivals],
      DirectionArg::Both => &Direction::BOTH,
    }
  }
}

struct Services {
  gateway: FlightGateway,
  reconciler: Reconciler,
  pool: RefreshPool,
}

impl Services {
  async fn build(config: &Config) -> Result<Self> {
    let repo: Arc<dyn FlightRepository> = Arc::new(SqliteFlightStore::open(&config.store_path()?)?);
    let source: Arc<dyn FlightSource> = Arc::new(AirLabsClient::new(config)?);

    let backend: Arc<dyn CacheStore> = match config.cache.backend {
      CacheBackend::Redis => Arc::new(RedisCache::connect(&config.cache.redis_url).await?),
      CacheBackend::Memory => Arc::new(MemoryCache::new()),
    };
    let policy = FreshnessPolicy::new(
      Duration::from_secs(config.cache.fresh_secs),
      Duration::from_secs(config.cache.ttl_secs),
    );

    let reconciler = Reconciler::new(source, repo.clone());
    let refresher = BoardRefresher::new(
      reconciler.clone(),
      repo,
      Arc::new(CacheLayer::new(backend.clone(), policy)),
      DistributedLock::new(backend),
      Duration::from_secs(config.cache.lock_ttl_secs),
    );
    let pool = RefreshPool::spawn(
      refresher.clone(),
      config.refresh.workers,
      config.refresh.queue_capacity,
    );
    let gateway = FlightGateway::new(refresher, pool.queue());

    Ok(Self {
      gateway,
      reconciler,
      pool,
    })
  }
}

/// Log to stderr and to a daily file under the data directory.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)?;
  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "flightboard.log"));

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flightboard=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer),
    )
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let services = Services::build(&config).await?;

  let result = run(&services, args.command).await;
  services.pool.shutdown().await;
  result
}

async fn run(services: &Services, command: Command) -> Result<()> {
  match command {
    Command::Board { airport } => {
      let result = services.gateway.get_flights(&airport).await?;
      if result.data.is_empty() {
        warn!(airport = %airport, "no flights on the board");
      }
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }
    Command::Sync { airport, direction } => {
      let airport = normalize_airport(&airport)?;
      let mut writes = 0;
      for &direction in direction.directions() {
        let report = services.reconciler.sync(direction, &airport).await?;
        writes += report.writes();
        println!("{}", report);
      }
      // The cached board predates this sync
      if writes > 0 {
        services.gateway.evict(&airport).await?;
      }
    }
    Command::Watch { airport, interval } => {
      let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          _ = ticker.tick() => {}
        }
        match services.gateway.get_flights(&airport).await {
          Ok(result) => info!(
            airport = %airport,
            source = ?result.source,
            stale = result.source == CacheSource::CacheStale,
            age_secs = result.cached_at.map(|t| (Utc::now() - t).num_seconds()),
            departures = result.data.departures.len(),
            arrivals = result.data.arrivals.len(),
            "board read"
          ),
          Err(e) => warn!(airport = %airport, error = %e, "board read failed"),
        }
      }
    }
    Command::Evict { airport } => {
      services.gateway.evict(&airport).await?;
      info!(airport = %airport, "cached board evicted");
    }
  }
  Ok(())
}
