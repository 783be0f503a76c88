//! Campus Pulse CLI
//!
//! Command-line interface for the campus dashboard synchronization layer:
//! - Run the live sync loop (default)
//! - Fetch one domain snapshot, entity or history
//! - Print a default configuration file

use anyhow::Context;
use campus_pulse::aggregator::{summarize, DataAggregator, HttpBackend};
use campus_pulse::config::{generate_default_config, Config, LoggingConfig};
use campus_pulse::connection::{ConnectionManager, SocketIoChannel};
use campus_pulse::map::{InMemoryLayer, MapLayerSync};
use campus_pulse::model::Domain;
use campus_pulse::sync::{DashboardEvent, Projection, UpdateScheduler};
use campus_pulse::timeseries::TimeSeriesStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser)]
#[command(name = "campus-pulse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Realtime synchronization for the campus IoT dashboard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Keep every domain in sync and log changes (default)
    Run,

    /// Fetch one domain and print its derived metrics
    Snapshot {
        /// Domain (parking, buildings, wifi, weather, bus, taxi)
        domain: Domain,
    },

    /// Fetch one entity
    Entity {
        domain: Domain,
        id: String,
    },

    /// Fetch the history of one entity
    History {
        domain: Domain,
        id: String,
        /// Only print this metric
        #[arg(short, long)]
        metric: Option<String>,
    },

    /// Print a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::InitConfig = command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    // config loading logs before the configured subscriber exists
    let bootstrap = bootstrap_subscriber(cli.log_level.as_deref(), std::io::stderr);
    let mut config = tracing::subscriber::with_default(bootstrap, || match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::load_default()),
    })?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_logging(&config.logging);

    match command {
        Commands::Run => run(config).await,
        Commands::Snapshot { domain } => {
            let aggregator = aggregator(&config)?;
            let snapshot = aggregator.fetch_snapshot(domain).await?;
            println!("{}", serde_json::to_string_pretty(&summarize(&snapshot))?);
            Ok(())
        }
        Commands::Entity { domain, id } => {
            let entity = aggregator(&config)?.fetch_entity(domain, &id).await?;
            println!("{}", serde_json::to_string_pretty(&entity)?);
            Ok(())
        }
        Commands::History { domain, id, metric } => {
            let history = aggregator(&config)?.fetch_history(domain, &id).await?;
            let output = match metric {
                Some(metric) => serde_json::to_string_pretty(history.samples(&metric))?,
                None => serde_json::to_string_pretty(&history)?,
            };
            println!("{}", output);
            Ok(())
        }
        Commands::InitConfig => Ok(()),
    }
}

/// Plain subscriber used until the configuration is known
fn bootstrap_subscriber<W>(level: Option<&str>, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("campus_pulse={}", level.unwrap_or("info"))));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish()
}

/// Logs go to stderr so command output stays parseable
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("campus_pulse={}", logging.level)));
    let json = logging.is_json();

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn aggregator(config: &Config) -> anyhow::Result<DataAggregator> {
    let backend = HttpBackend::new(&config.backend)?;
    Ok(DataAggregator::new(Arc::new(backend)))
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Campus Pulse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(backend = %config.backend.base_url, "Backend");

    let (events, _) = broadcast::channel(1024);
    let map = MapLayerSync::transport(
        Default::default(),
        Box::new(InMemoryLayer::new()),
        Box::new(InMemoryLayer::new()),
    );
    let projection = Projection::new(TimeSeriesStore::from_config(&config.history), map, events);

    let mut scheduler =
        UpdateScheduler::new(config.scheduler.clone(), aggregator(&config)?, projection);
    let mut updates = scheduler.subscribe();

    let push = if config.push.enabled {
        let manager = Arc::new(ConnectionManager::new());
        scheduler.attach(&manager).await;
        let channel = SocketIoChannel::from_config(&config.push);
        let handle = Arc::clone(&manager).start(Box::new(channel));
        tracing::info!(url = %config.push.url, "Push channel enabled");
        Some((manager, handle))
    } else {
        tracing::info!("Push channel disabled, polling only");
        None
    };

    scheduler.start()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down...");
                break;
            }
            event = updates.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some((manager, handle)) = push {
        manager.stop();
        let _ = handle.await;
    }

    let projection = scheduler.stop().await?;
    let stats = projection.store().stats();
    tracing::info!(series = stats.series, samples = stats.samples, "Campus Pulse stopped");
    Ok(())
}

fn log_event(event: &DashboardEvent) {
    match event {
        DashboardEvent::SnapshotChanged {
            domain,
            metrics,
            snapshot,
        } => {
            let figures = serde_json::to_string(metrics).unwrap_or_default();
            tracing::info!(domain = %domain, entities = snapshot.len(), metrics = %figures, "Snapshot");
        }
        DashboardEvent::SeriesUpdated { key, samples } => {
            tracing::trace!(series = %key, samples = samples.len(), "Series updated");
        }
        DashboardEvent::OverlayReconciled { domain, report } => {
            tracing::debug!(
                domain = %domain,
                rendered = report.rendered,
                skipped = report.skipped,
                "Overlay"
            );
        }
        DashboardEvent::RefreshFailed { domain, error } => {
            tracing::warn!(domain = %domain, error = %error, "Refresh failed, keeping last snapshot");
        }
        DashboardEvent::ConnectionChanged(state) => {
            tracing::info!(state = ?state, "Push channel");
        }
    }
}
