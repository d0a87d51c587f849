//! Power and activity state, and what it implies for keep-alive timing.
//!
//! The policy publishes a [`PowerSnapshot`] on a `watch` channel. The engine
//! watches it to retune the transport keep-alive, and the health monitor
//! reads it on every tick to derive thresholds.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use super::guard::ResourceGuard;
use crate::error::{Error, Result};

/// Battery at or below this level is critical.
pub const CRITICAL_BATTERY_LEVEL: u8 = 15;

/// Battery at or below this level (and above critical) is low.
pub const LOW_BATTERY_LEVEL: u8 = 30;

/// Host activity, from most to least active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PowerState {
    Foreground,
    Background,
    Idle,
    Hibernating,
}

impl PowerState {
    /// Keep-alive interval before battery scaling.
    pub fn base_keep_alive(&self) -> Duration {
        match self {
            Self::Foreground => Duration::from_secs(30),
            Self::Background => Duration::from_secs(60),
            Self::Idle => Duration::from_secs(120),
            Self::Hibernating => Duration::from_secs(300),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::Idle => "idle",
            Self::Hibernating => "hibernating",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "foreground" => Ok(Self::Foreground),
            "background" => Ok(Self::Background),
            "idle" => Ok(Self::Idle),
            "hibernating" => Ok(Self::Hibernating),
            other => Err(Error::Config(format!("Unknown power state: {}", other))),
        }
    }
}

/// Battery level bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatteryBand {
    Critical,
    Low,
    High,
}

impl BatteryBand {
    /// Bucket a battery percentage. A charging host is always `High`.
    pub fn from_level(level: u8, charging: bool) -> Self {
        if charging {
            Self::High
        } else if level <= CRITICAL_BATTERY_LEVEL {
            Self::Critical
        } else if level <= LOW_BATTERY_LEVEL {
            Self::Low
        } else {
            Self::High
        }
    }

    /// Factor applied to the state's base keep-alive.
    pub fn keep_alive_multiplier(&self) -> f64 {
        match self {
            Self::Critical => 2.0,
            Self::Low => 1.5,
            Self::High => 1.0,
        }
    }

    /// Reconnect attempts tolerated before a connection counts as unhealthy.
    pub fn reconnect_budget(&self) -> u32 {
        match self {
            Self::Critical => 3,
            Self::Low => 5,
            Self::High => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// How much an operation matters when power is scarce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Importance {
    Low,
    Normal,
    High,
    Critical,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Everything the policy knows at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerSnapshot {
    pub state: PowerState,
    /// 0..=100.
    pub battery_level: u8,
    pub charging: bool,
}

impl PowerSnapshot {
    pub fn band(&self) -> BatteryBand {
        BatteryBand::from_level(self.battery_level, self.charging)
    }

    /// Battery level as the health thresholds should see it.
    pub fn effective_battery_level(&self) -> u8 {
        if self.charging {
            100
        } else {
            self.battery_level
        }
    }

    /// Base keep-alive for the state, scaled by the battery band.
    pub fn keep_alive_interval(&self) -> Duration {
        self.state
            .base_keep_alive()
            .mul_f64(self.band().keep_alive_multiplier())
    }
}

impl Default for PowerSnapshot {
    fn default() -> Self {
        Self {
            state: PowerState::Foreground,
            battery_level: 100,
            charging: false,
        }
    }
}

/// Owner of the current power snapshot.
pub struct PowerPolicy {
    tx: watch::Sender<PowerSnapshot>,
    active_guards: Arc<AtomicUsize>,
}

impl PowerPolicy {
    pub fn new(initial: PowerSnapshot) -> Self {
        let (tx, _) = watch::channel(initial);
        metrics::gauge!("power_keep_alive_seconds").set(initial.keep_alive_interval().as_secs_f64());
        Self {
            tx,
            active_guards: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self) -> PowerSnapshot {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<PowerSnapshot> {
        self.tx.subscribe()
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.snapshot().keep_alive_interval()
    }

    pub fn set_state(&self, state: PowerState) {
        self.update(|s| s.state = state);
    }

    pub fn set_battery(&self, level: u8, charging: bool) {
        self.update(|s| {
            s.battery_level = level.min(100);
            s.charging = charging;
        });
    }

    fn update<F: FnOnce(&mut PowerSnapshot)>(&self, f: F) {
        let changed = self.tx.send_if_modified(|snapshot| {
            let before = *snapshot;
            f(snapshot);
            *snapshot != before
        });
        if changed {
            let snapshot = self.snapshot();
            let keep_alive = snapshot.keep_alive_interval();
            metrics::gauge!("power_keep_alive_seconds").set(keep_alive.as_secs_f64());
            tracing::info!(
                state = %snapshot.state,
                battery = snapshot.battery_level,
                charging = snapshot.charging,
                band = snapshot.band().as_str(),
                "Power state changed, keep-alive now {:?}",
                keep_alive
            );
        }
    }

    // =========================================================================
    // Resource guards
    // =========================================================================

    /// Hold a resource for `operation` for at most `estimated_duration`.
    ///
    /// `Critical` always acquires. `Low` is skipped (returns `None`) while
    /// the battery band is low or critical.
    pub fn acquire_guarded_resource(
        &self,
        operation: &str,
        estimated_duration: Duration,
        importance: Importance,
    ) -> Option<ResourceGuard> {
        if importance == Importance::Low && self.snapshot().band() != BatteryBand::High {
            metrics::counter!("power_guard_skipped_total").increment(1);
            tracing::debug!(operation, "Skipping low-importance work on low battery");
            return None;
        }

        metrics::counter!("power_guard_acquired_total", "importance" => importance.as_str())
            .increment(1);
        Some(ResourceGuard::acquire(
            operation,
            estimated_duration,
            self.active_guards.clone(),
        ))
    }

    /// Guards currently held.
    pub fn active_guards(&self) -> usize {
        self.active_guards.load(Ordering::SeqCst)
    }
}

impl Default for PowerPolicy {
    fn default() -> Self {
        Self::new(PowerSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Bands and intervals
    // =========================================================================

    #[test]
    fn test_battery_bands() {
        assert_eq!(BatteryBand::from_level(100, false), BatteryBand::High);
        assert_eq!(BatteryBand::from_level(31, false), BatteryBand::High);
        assert_eq!(BatteryBand::from_level(30, false), BatteryBand::Low);
        assert_eq!(BatteryBand::from_level(16, false), BatteryBand::Low);
        assert_eq!(BatteryBand::from_level(15, false), BatteryBand::Critical);
        assert_eq!(BatteryBand::from_level(0, false), BatteryBand::Critical);
        assert_eq!(BatteryBand::from_level(5, true), BatteryBand::High);
    }

    #[test]
    fn test_keep_alive_grows_with_conservatism() {
        let mut previous = Duration::ZERO;
        for state in [
            PowerState::Foreground,
            PowerState::Background,
            PowerState::Idle,
            PowerState::Hibernating,
        ] {
            assert!(state.base_keep_alive() > previous);
            previous = state.base_keep_alive();
        }
    }

    #[test]
    fn test_battery_scales_keep_alive() {
        let mut snapshot = PowerSnapshot {
            state: PowerState::Background,
            battery_level: 80,
            charging: false,
        };
        assert_eq!(snapshot.keep_alive_interval(), Duration::from_secs(60));

        snapshot.battery_level = 25;
        assert_eq!(snapshot.keep_alive_interval(), Duration::from_secs(90));

        snapshot.battery_level = 10;
        assert_eq!(snapshot.keep_alive_interval(), Duration::from_secs(120));

        snapshot.charging = true;
        assert_eq!(snapshot.keep_alive_interval(), Duration::from_secs(60));
        assert_eq!(snapshot.effective_battery_level(), 100);
    }

    #[test]
    fn test_power_state_parse() {
        assert_eq!("Idle".parse::<PowerState>().unwrap(), PowerState::Idle);
        assert!("asleep".parse::<PowerState>().is_err());
    }

    // =========================================================================
    // Policy
    // =========================================================================

    #[tokio::test]
    async fn test_watch_notifies_on_change_only() {
        let policy = PowerPolicy::default();
        let mut rx = policy.subscribe();

        policy.set_state(PowerState::Foreground);
        assert!(!rx.has_changed().unwrap());

        policy.set_state(PowerState::Idle);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, PowerState::Idle);

        policy.set_battery(150, false);
        assert_eq!(policy.snapshot().battery_level, 100);
    }

    #[tokio::test]
    async fn test_low_importance_skipped_on_low_battery() {
        let policy = PowerPolicy::default();
        let guard = policy.acquire_guarded_resource("sync", Duration::from_secs(1), Importance::Low);
        assert!(guard.is_some());
        drop(guard);

        policy.set_battery(20, false);
        assert!(
            policy
                .acquire_guarded_resource("sync", Duration::from_secs(1), Importance::Low)
                .is_none()
        );
        assert!(
            policy
                .acquire_guarded_resource("sync", Duration::from_secs(1), Importance::Normal)
                .is_some()
        );

        policy.set_battery(1, false);
        let critical =
            policy.acquire_guarded_resource("dispatch", Duration::from_secs(1), Importance::Critical);
        assert!(critical.is_some());
        assert_eq!(policy.active_guards(), 1);
    }
}
