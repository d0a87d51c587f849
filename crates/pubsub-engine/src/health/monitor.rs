//! Periodic health driver.
//!
//! Each tick reads a connection snapshot, the power snapshot and the network
//! signal, runs [`perform_health_check`], and issues one bulk refresh when
//! anything is unhealthy. After a refresh it holds off for the subscription
//! timeout so reopening connections get a chance to confirm before they are
//! judged again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::orchestrator::{HealthReport, perform_health_check};
use crate::bus::{EngineEvent, EventBus};
use crate::collab::NetworkSignal;
use crate::power::PowerPolicy;
use crate::relay::{ConnectionKey, RelayHealth};

/// Default interval between health checks.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Shorter intervals are raised to this.
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// The two things the monitor may do to the connection manager.
pub trait ConnectionControl: Send + Sync {
    /// Read-only health of every live connection.
    fn snapshot_health(&self) -> BTreeMap<ConnectionKey, RelayHealth>;

    /// Force-reconnect everything. Returns the number of connections touched.
    fn refresh(&self) -> usize;
}

/// Monitor tunables.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

/// Result of one monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Skipped while a recent refresh settles.
    Grace,
    /// Checked; nothing to do.
    Healthy(HealthReport),
    /// Checked and refreshed.
    Refreshed(HealthReport),
}

impl TickOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Grace => "grace",
            Self::Healthy(_) => "healthy",
            Self::Refreshed(_) => "refreshed",
        }
    }
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    connections: Arc<dyn ConnectionControl>,
    power: Arc<PowerPolicy>,
    network: Arc<dyn NetworkSignal>,
    bus: EventBus,
    grace_until: Mutex<Option<Instant>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        connections: Arc<dyn ConnectionControl>,
        power: Arc<PowerPolicy>,
        network: Arc<dyn NetworkSignal>,
        bus: EventBus,
    ) -> Self {
        if config.interval < MIN_HEALTH_INTERVAL {
            tracing::warn!(
                "Health interval {:?} too short, using {:?}",
                config.interval,
                MIN_HEALTH_INTERVAL
            );
        }
        Self {
            config: HealthMonitorConfig {
                interval: config.interval.max(MIN_HEALTH_INTERVAL),
            },
            connections,
            power,
            network,
            bus,
            grace_until: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Run one health check now.
    pub fn tick(&self) -> TickOutcome {
        let outcome = self.evaluate();
        metrics::counter!("health_checks_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn evaluate(&self) -> TickOutcome {
        let now = Instant::now();
        {
            let mut grace = self.grace_until.lock();
            match *grace {
                Some(until) if now < until => {
                    tracing::debug!("Health check skipped during refresh grace period");
                    return TickOutcome::Grace;
                }
                Some(_) => *grace = None,
                None => {}
            }
        }

        let snapshot = self.connections.snapshot_health();
        let power = self.power.snapshot();
        let ping_seconds = power.keep_alive_interval().as_secs();
        let quality = self.network.quality();

        let report = perform_health_check(
            &snapshot,
            power.effective_battery_level(),
            ping_seconds,
            quality,
        );

        metrics::gauge!("health_unhealthy_connections").set(report.unhealthy_count() as f64);
        self.bus.publish(EngineEvent::HealthChecked {
            total: report.total,
            healthy: report.healthy,
            unhealthy: report.unhealthy_count(),
        });

        if !report.needs_refresh() {
            tracing::debug!(
                "Health check: {}/{} connections healthy",
                report.healthy,
                report.total
            );
            return TickOutcome::Healthy(report);
        }

        tracing::warn!(
            quality = %quality,
            battery = power.battery_level,
            "Health check: {} of {} connections unhealthy, refreshing",
            report.unhealthy_count(),
            report.total
        );
        let refreshed = self.connections.refresh();
        self.bus.publish(EngineEvent::RefreshIssued {
            connections: refreshed,
        });

        let grace = Duration::from_millis(report.thresholds.subscription_timeout_ms);
        *self.grace_until.lock() = Some(now + grace);

        TickOutcome::Refreshed(report)
    }

    /// Tick every `interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Health monitor started (interval {:?})", self.config.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{NetworkQuality, StaticNetworkSignal};
    use crate::power::{PowerSnapshot, PowerState};
    use crate::relay::ConnectionState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConnections {
        snapshot: Mutex<BTreeMap<ConnectionKey, RelayHealth>>,
        refreshes: AtomicUsize,
    }

    impl FakeConnections {
        fn new(state: ConnectionState, confirmed: bool, age_ms: u64) -> Arc<Self> {
            let mut snapshot = BTreeMap::new();
            snapshot.insert(
                ConnectionKey::new("cfg", "wss://relay.example.com"),
                RelayHealth {
                    state,
                    last_message_age_ms: age_ms,
                    reconnect_attempts: 0,
                    subscription_confirmed: confirmed,
                },
            );
            Arc::new(Self {
                snapshot: Mutex::new(snapshot),
                refreshes: AtomicUsize::new(0),
            })
        }
    }

    impl ConnectionControl for FakeConnections {
        fn snapshot_health(&self) -> BTreeMap<ConnectionKey, RelayHealth> {
            self.snapshot.lock().clone()
        }

        fn refresh(&self) -> usize {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.snapshot.lock().len()
        }
    }

    fn monitor(connections: Arc<FakeConnections>, power: PowerSnapshot) -> HealthMonitor {
        HealthMonitor::new(
            HealthMonitorConfig::default(),
            connections,
            Arc::new(PowerPolicy::new(power)),
            Arc::new(StaticNetworkSignal::new(NetworkQuality::High)),
            EventBus::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_tick_does_not_refresh() {
        let fake = FakeConnections::new(ConnectionState::Connected, true, 100);
        let monitor = monitor(fake.clone(), PowerSnapshot::default());

        assert!(matches!(monitor.tick(), TickOutcome::Healthy(_)));
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_tick_refreshes_then_grace() {
        let fake = FakeConnections::new(ConnectionState::Failed, false, 0);
        let monitor = monitor(fake.clone(), PowerSnapshot::default());

        match monitor.tick() {
            TickOutcome::Refreshed(report) => assert_eq!(report.unhealthy_count(), 1),
            other => panic!("expected refresh, got {:?}", other),
        }
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);

        // Within the 30s confirmation window
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(monitor.tick(), TickOutcome::Grace);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(matches!(monitor.tick(), TickOutcome::Refreshed(_)));
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_judged_against_power_scaled_ping() {
        // 150s of silence: too long in the foreground (30s * 3), fine when
        // backgrounded (60s * 3)
        let fake = FakeConnections::new(ConnectionState::Connected, true, 150_000);

        let foreground = monitor(fake.clone(), PowerSnapshot::default());
        assert!(matches!(foreground.tick(), TickOutcome::Refreshed(_)));

        let background = monitor(
            fake.clone(),
            PowerSnapshot {
                state: PowerState::Background,
                battery_level: 80,
                charging: false,
            },
        );
        assert!(matches!(background.tick(), TickOutcome::Healthy(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let fake = FakeConnections::new(ConnectionState::Failed, false, 0);
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval: Duration::from_secs(5),
            },
            fake.clone(),
            Arc::new(PowerPolicy::default()),
            Arc::new(StaticNetworkSignal::new(NetworkQuality::High)),
            EventBus::new(),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_raised_to_minimum() {
        let fake = FakeConnections::new(ConnectionState::Failed, false, 0);
        let monitor = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                interval: Duration::ZERO,
            },
            fake.clone(),
            Arc::new(PowerPolicy::default()),
            Arc::new(StaticNetworkSignal::new(NetworkQuality::High)),
            EventBus::new(),
        ));
        assert_eq!(monitor.interval(), MIN_HEALTH_INTERVAL);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
