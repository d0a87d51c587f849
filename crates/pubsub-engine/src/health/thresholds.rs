//! Health thresholds derived from power and network state.

use crate::collab::NetworkQuality;
use crate::power::BatteryBand;

/// Limits a connection must stay within to count as healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Longest tolerated gap since the last inbound activity.
    pub max_silence_ms: u64,
    /// Reconnect attempts at or above this are unhealthy.
    pub max_reconnect_attempts: u32,
    /// How long a fresh subscription gets to be confirmed.
    pub subscription_timeout_ms: u64,
}

impl HealthThresholds {
    /// Pure function of battery level, keep-alive (ping) interval and network
    /// quality.
    ///
    /// Silence tolerance is a multiple of the ping interval; a worse network
    /// gets a smaller multiple so dead sockets are noticed sooner. A draining
    /// battery shrinks both the reconnect budget and the confirmation window.
    pub fn compute(battery_level: u8, ping_interval_seconds: u64, quality: NetworkQuality) -> Self {
        let band = BatteryBand::from_level(battery_level, false);
        let ping_ms = ping_interval_seconds.saturating_mul(1000);

        Self {
            max_silence_ms: (ping_ms as f64 * silence_multiplier(quality)) as u64,
            max_reconnect_attempts: band.reconnect_budget(),
            subscription_timeout_ms: subscription_timeout_ms(band),
        }
    }
}

fn silence_multiplier(quality: NetworkQuality) -> f64 {
    match quality {
        NetworkQuality::High => 3.0,
        NetworkQuality::Medium => 2.5,
        NetworkQuality::Low => 2.0,
        NetworkQuality::None => 1.5,
    }
}

fn subscription_timeout_ms(band: BatteryBand) -> u64 {
    match band {
        BatteryBand::High => 30_000,
        BatteryBand::Low => 20_000,
        BatteryBand::Critical => 10_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_scales_with_ping() {
        let t = HealthThresholds::compute(80, 30, NetworkQuality::High);
        assert_eq!(t.max_silence_ms, 90_000);

        let t = HealthThresholds::compute(80, 60, NetworkQuality::High);
        assert_eq!(t.max_silence_ms, 180_000);
    }

    #[test]
    fn test_multiplier_decreases_with_quality() {
        let silence = |q| HealthThresholds::compute(80, 60, q).max_silence_ms;
        assert!(silence(NetworkQuality::High) > silence(NetworkQuality::Medium));
        assert!(silence(NetworkQuality::Medium) > silence(NetworkQuality::Low));
        assert!(silence(NetworkQuality::Low) > silence(NetworkQuality::None));
        assert_eq!(silence(NetworkQuality::None), 90_000);
    }

    #[test]
    fn test_battery_shrinks_budgets() {
        let high = HealthThresholds::compute(90, 30, NetworkQuality::High);
        let low = HealthThresholds::compute(25, 30, NetworkQuality::High);
        let critical = HealthThresholds::compute(5, 30, NetworkQuality::High);

        assert_eq!(high.max_reconnect_attempts, 10);
        assert_eq!(low.max_reconnect_attempts, 5);
        assert_eq!(critical.max_reconnect_attempts, 3);

        assert!(high.subscription_timeout_ms > low.subscription_timeout_ms);
        assert!(low.subscription_timeout_ms > critical.subscription_timeout_ms);
    }
}
