//! Relay subscription daemon.
//!
//! Loads subscription configurations from a JSON file, keeps one relay
//! subscription open per (configuration, relay) pair, and logs every
//! matching event as it is delivered.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./configurations.json, ./data/ledger.db)
//! pubsub-engine
//!
//! # Simulate a backgrounded device on a weak battery
//! pubsub-engine --power-state background --battery-level 25
//!
//! # Custom paths, re-read the configuration file every minute
//! pubsub-engine \
//!     --configurations /etc/pubsub/configurations.json \
//!     --ledger-path /var/lib/pubsub/ledger.db \
//!     --reload-interval-secs 60
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM for graceful shutdown:
//! 1. Sends CLOSE for every open subscription
//! 2. Stops the manager, pipeline and health tasks
//! 3. Processes frames already queued
//! 4. Exits cleanly

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use pubsub_core::metrics::{init_metrics, start_metrics_server};
use pubsub_engine::relay::{BackoffConfig, DEFAULT_KEEP_ALIVE_MINOR_THRESHOLD};
use pubsub_engine::{
    BusDispatcher, Collaborators, ConnectionManagerConfig, Engine, EngineSettings, EventBus,
    FileConfigurationStore, HealthMonitorConfig, LedgerConfig, NetworkQuality, PipelineConfig,
    PowerSnapshot, PowerState, SqliteStore, StaticNetworkSignal, WsTransportFactory,
};
use tracing_subscriber::EnvFilter;

/// Relay subscription daemon.
#[derive(Parser, Debug)]
#[command(name = "pubsub-engine")]
#[command(about = "Adaptive Nostr relay subscription daemon")]
#[command(version)]
struct Args {
    /// JSON file with subscription configurations
    #[arg(long, short, env = "PUBSUB_CONFIGURATIONS", default_value = "./configurations.json")]
    configurations: PathBuf,

    /// SQLite file for the subscription ledger
    #[arg(long, env = "PUBSUB_LEDGER_PATH", default_value = "./data/ledger.db")]
    ledger_path: PathBuf,

    /// Re-read the configuration file this often (0 to disable)
    #[arg(long, default_value = "0")]
    reload_interval_secs: u64,

    /// Initial power state (foreground, background, idle, hibernating)
    #[arg(long, default_value = "foreground")]
    power_state: PowerState,

    /// Initial battery level, 0-100
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u8).range(0..=100))]
    battery_level: u8,

    /// Device is charging
    #[arg(long)]
    charging: bool,

    /// Network quality (none, low, medium, high)
    #[arg(long, default_value = "high")]
    network_quality: NetworkQuality,

    /// Seconds between health checks
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    health_interval_secs: u64,

    /// First reconnect delay in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_base_ms: u64,

    /// Reconnect delay cap in seconds
    #[arg(long, default_value = "300")]
    backoff_max_secs: u64,

    /// Look-back in seconds for relays without a watermark
    #[arg(long, default_value = "300")]
    safety_buffer_secs: u64,

    /// Inbound frame queue capacity
    #[arg(long, default_value = "100")]
    queue_capacity: usize,

    /// Frames processed per batch
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Pause between batches in milliseconds
    #[arg(long, default_value = "50")]
    batch_pause_ms: u64,

    /// Delivered event ids remembered for boundary dedupe
    #[arg(long, default_value = "10000")]
    seen_capacity: usize,

    /// WebSocket connect timeout in seconds
    #[arg(long, default_value = "15")]
    connect_timeout_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

impl Args {
    fn settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            manager: ConnectionManagerConfig {
                backoff: BackoffConfig {
                    base: Duration::from_millis(self.backoff_base_ms),
                    max_delay: Duration::from_secs(self.backoff_max_secs),
                },
                keep_alive_minor_threshold: DEFAULT_KEEP_ALIVE_MINOR_THRESHOLD,
            },
            pipeline: PipelineConfig {
                queue_capacity: self.queue_capacity,
                batch_size: self.batch_size,
                batch_pause: Duration::from_millis(self.batch_pause_ms),
            },
            ledger: LedgerConfig {
                safety_buffer: Duration::from_secs(self.safety_buffer_secs),
                ..defaults.ledger
            },
            health: HealthMonitorConfig {
                interval: Duration::from_secs(self.health_interval_secs),
            },
            seen_capacity: self.seen_capacity,
            initial_power: PowerSnapshot {
                state: self.power_state,
                battery_level: self.battery_level,
                charging: self.charging,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("pubsub_engine=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Relay subscription daemon starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
        gauge!("engine_running").set(1.0);
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Collaborators
    let configurations = Arc::new(
        FileConfigurationStore::open(&args.configurations)
            .with_context(|| format!("Failed to load {}", args.configurations.display()))?,
    );
    let store = Arc::new(
        SqliteStore::open(&args.ledger_path)
            .with_context(|| format!("Failed to open ledger {}", args.ledger_path.display()))?,
    );
    let bus = EventBus::new();
    let settings = args.settings();

    tracing::info!("Configuration:");
    tracing::info!("  Configurations: {}", args.configurations.display());
    tracing::info!("  Ledger:         {}", args.ledger_path.display());
    tracing::info!(
        "  Power:          {} (battery {}%{})",
        settings.initial_power.state,
        settings.initial_power.battery_level,
        if settings.initial_power.charging { ", charging" } else { "" }
    );
    tracing::info!("  Network:        {}", args.network_quality);
    tracing::info!("  Health check:   every {}s", args.health_interval_secs);
    tracing::info!(
        "  Backoff:        {}ms .. {}s",
        args.backoff_base_ms,
        args.backoff_max_secs
    );

    let engine = Engine::start(
        settings.clone(),
        Collaborators {
            configurations: configurations.clone(),
            dispatcher: Arc::new(BusDispatcher::new(bus.clone())),
            network: Arc::new(StaticNetworkSignal::new(args.network_quality)),
            store,
            transports: Arc::new(WsTransportFactory::new(
                settings.initial_power.keep_alive_interval(),
                Duration::from_secs(args.connect_timeout_secs),
            )),
            bus,
        },
    );

    // Main loop: wait for shutdown, re-read configurations when due
    let reload_every = (args.reload_interval_secs > 0)
        .then(|| Duration::from_secs(args.reload_interval_secs));
    let mut last_reload = tokio::time::Instant::now();
    let mut reloads = 0u64;

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;

        if let Some(every) = reload_every
            && last_reload.elapsed() >= every
        {
            last_reload = tokio::time::Instant::now();
            match configurations.reload() {
                Ok(count) => {
                    let report = engine.reload_configurations();
                    reloads += 1;
                    tracing::debug!(
                        "Reloaded {} configurations (+{} -{})",
                        count,
                        report.added,
                        report.removed
                    );
                }
                Err(e) => tracing::warn!("Configuration reload failed, keeping previous: {}", e),
            }
        }
    }

    let connections = engine.manager().connection_count();
    let ledger_entries = engine.ledger().len();
    let seen_events = engine.seen().len();
    let health = engine.manager().snapshot_health();
    let confirmed = health.values().filter(|h| h.subscription_confirmed).count();

    engine.shutdown().await;

    // Mark as stopped
    gauge!("engine_running").set(0.0);

    // Print summary
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Connections:          {}", connections);
    tracing::info!("Subscriptions live:   {}", confirmed);
    tracing::info!("Ledger entries:       {}", ledger_entries);
    tracing::info!("Events remembered:    {}", seen_events);
    tracing::info!("Configuration reloads: {}", reloads);

    Ok(())
}
