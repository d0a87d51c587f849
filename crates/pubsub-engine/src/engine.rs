//! Engine assembly and lifecycle.
//!
//! [`Engine::start`] wires the ledger, seen-event cache, pipeline, connection
//! manager, health monitor and power watcher together and spawns their
//! tasks. [`Engine::shutdown`] closes every subscription and waits for the
//! tasks to stop.
//!
//! # Startup Sequence
//!
//! 1. Load persisted ledger records, purge stale and orphaned ones
//! 2. Register every enabled (configuration, relay) pair
//! 3. Build the transport factory for the current power state
//! 4. Open all connections
//! 5. Spawn the manager event loop, pipeline worker, health monitor and
//!    power watcher

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::collab::{ConfigurationStore, NetworkSignal, NotificationDispatcher};
use crate::health::{HealthMonitor, HealthMonitorConfig};
use crate::ledger::{KvStore, LedgerConfig, SubscriptionLedger};
use crate::pipeline::{MessagePipeline, PipelineConfig, PipelineDeps};
use crate::power::{PowerPolicy, PowerSnapshot};
use crate::relay::{
    ConnectionManager, ConnectionManagerConfig, ConnectionManagerDeps, SyncReport,
    TransportFactory,
};
use crate::seen::{DEFAULT_SEEN_CAPACITY, SeenEventCache};

/// Every engine tunable.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub manager: ConnectionManagerConfig,
    pub pipeline: PipelineConfig,
    pub ledger: LedgerConfig,
    pub health: HealthMonitorConfig,
    pub seen_capacity: usize,
    pub initial_power: PowerSnapshot,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            manager: ConnectionManagerConfig::default(),
            pipeline: PipelineConfig::default(),
            ledger: LedgerConfig::default(),
            health: HealthMonitorConfig::default(),
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            initial_power: PowerSnapshot::default(),
        }
    }
}

/// What the engine is plugged into.
pub struct Collaborators {
    pub configurations: Arc<dyn ConfigurationStore>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub network: Arc<dyn NetworkSignal>,
    pub store: Arc<dyn KvStore>,
    pub transports: Arc<dyn TransportFactory>,
    pub bus: EventBus,
}

/// A running engine.
pub struct Engine {
    manager: ConnectionManager,
    ledger: Arc<SubscriptionLedger>,
    pipeline: Arc<MessagePipeline>,
    seen: Arc<SeenEventCache>,
    power: Arc<PowerPolicy>,
    monitor: Arc<HealthMonitor>,
    configurations: Arc<dyn ConfigurationStore>,
    bus: EventBus,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Assemble and start the engine. Must be called inside a tokio runtime.
    pub fn start(settings: EngineSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            configurations,
            dispatcher,
            network,
            store,
            transports,
            bus,
        } = collaborators;

        // Ledger
        let ledger = Arc::new(SubscriptionLedger::new(store, settings.ledger.clone()));
        ledger.load_persisted();
        ledger.cleanup_stale();

        let enabled = configurations.enabled_configurations();
        let valid_ids: HashSet<String> = enabled.iter().map(|c| c.id.clone()).collect();
        ledger.cleanup_orphans(&valid_ids);
        for configuration in &enabled {
            for relay_url in &configuration.relay_urls {
                ledger.register(
                    &configuration.subscription_id,
                    &configuration.id,
                    &configuration.filter,
                    relay_url,
                );
            }
        }

        // Power and transports
        let power = Arc::new(PowerPolicy::new(settings.initial_power));
        let keep_alive = power.keep_alive_interval();
        let transports = if transports.keep_alive() == keep_alive {
            transports
        } else {
            transports.with_keep_alive(keep_alive)
        };

        // Pipeline and manager share one event channel
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let seen = Arc::new(SeenEventCache::new(settings.seen_capacity));
        let pipeline = Arc::new(MessagePipeline::new(
            settings.pipeline.clone(),
            PipelineDeps {
                ledger: ledger.clone(),
                seen: seen.clone(),
                configurations: configurations.clone(),
                dispatcher,
                power: power.clone(),
                manager_events: events_tx.clone(),
                bus: bus.clone(),
            },
        ));
        let manager = ConnectionManager::new(
            settings.manager.clone(),
            ConnectionManagerDeps {
                factory: transports,
                ledger: ledger.clone(),
                configurations: configurations.clone(),
                pipeline: pipeline.clone(),
                events: events_tx,
                bus: bus.clone(),
            },
        );
        let monitor = Arc::new(HealthMonitor::new(
            settings.health.clone(),
            Arc::new(manager.clone()),
            power.clone(),
            network,
            bus.clone(),
        ));

        manager.connect_all();

        // Tasks
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(manager.clone().run(events_rx, shutdown_rx.clone())),
            tokio::spawn(pipeline.clone().run(shutdown_rx.clone())),
            tokio::spawn(monitor.clone().run(shutdown_rx.clone())),
            tokio::spawn(watch_power(
                manager.clone(),
                power.subscribe(),
                shutdown_rx,
            )),
        ];

        tracing::info!(
            "Engine started: {} configurations, {} connections, keep-alive {:?}",
            enabled.len(),
            manager.connection_count(),
            keep_alive
        );

        Self {
            manager,
            ledger,
            pipeline,
            seen,
            power,
            monitor,
            configurations,
            bus,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }

    /// Pick up configuration changes: register new pairs, purge orphans and
    /// reconcile connections.
    pub fn reload_configurations(&self) -> SyncReport {
        let enabled = self.configurations.enabled_configurations();
        let valid_ids: HashSet<String> = enabled.iter().map(|c| c.id.clone()).collect();

        for configuration in &enabled {
            for relay_url in &configuration.relay_urls {
                self.ledger.register(
                    &configuration.subscription_id,
                    &configuration.id,
                    &configuration.filter,
                    relay_url,
                );
            }
        }
        let report = self.manager.sync(&enabled);
        self.ledger.cleanup_orphans(&valid_ids);
        report
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn ledger(&self) -> &Arc<SubscriptionLedger> {
        &self.ledger
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    pub fn seen(&self) -> &Arc<SeenEventCache> {
        &self.seen
    }

    pub fn power(&self) -> &Arc<PowerPolicy> {
        &self.power
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Close every subscription, process what is already queued, and stop
    /// all tasks.
    pub async fn shutdown(self) {
        tracing::info!("Engine shutting down...");
        self.manager.shutdown();

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Engine task ended abnormally: {}", e);
            }
        }

        let report = self.pipeline.drain().await;
        if report.processed() > 0 {
            tracing::info!("Processed {} queued frames during shutdown", report.processed());
        }
        tracing::info!("Engine stopped");
    }
}

/// Retune transports whenever the power snapshot changes.
async fn watch_power(
    manager: ConnectionManager,
    mut power: watch::Receiver<PowerSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = power.changed() => {
                if changed.is_err() {
                    break;
                }
                let keep_alive = power.borrow_and_update().keep_alive_interval();
                manager.update_keep_alive_interval(keep_alive);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
