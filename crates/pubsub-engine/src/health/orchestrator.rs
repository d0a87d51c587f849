//! Aggregate health check over every connection.

use std::collections::BTreeMap;

use super::evaluator::{UnhealthyReason, unhealthy_reason};
use super::thresholds::HealthThresholds;
use crate::collab::NetworkQuality;
use crate::relay::{ConnectionKey, RelayHealth};

/// What the caller should do after a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Force-refresh every connection.
    RefreshConnections,
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub thresholds: HealthThresholds,
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: Vec<(ConnectionKey, UnhealthyReason)>,
    /// Empty, or exactly one `RefreshConnections`.
    pub actions: Vec<HealthAction>,
}

impl HealthReport {
    pub fn unhealthy_count(&self) -> usize {
        self.unhealthy.len()
    }

    pub fn needs_refresh(&self) -> bool {
        self.actions.contains(&HealthAction::RefreshConnections)
    }
}

/// Evaluate every connection against thresholds derived from the inputs.
pub fn perform_health_check(
    connections: &BTreeMap<ConnectionKey, RelayHealth>,
    battery_level: u8,
    ping_interval_seconds: u64,
    quality: NetworkQuality,
) -> HealthReport {
    let thresholds = HealthThresholds::compute(battery_level, ping_interval_seconds, quality);

    let mut healthy = 0;
    let mut unhealthy = Vec::new();
    for (key, health) in connections {
        match unhealthy_reason(health, &thresholds) {
            None => {
                healthy += 1;
                tracing::debug!(
                    relay = %key.relay_url,
                    configuration = %key.configuration_id,
                    age_ms = health.last_message_age_ms,
                    "Connection healthy"
                );
            }
            Some(reason) => {
                tracing::warn!(
                    relay = %key.relay_url,
                    configuration = %key.configuration_id,
                    state = %health.state,
                    age_ms = health.last_message_age_ms,
                    attempts = health.reconnect_attempts,
                    "Connection unhealthy: {}",
                    reason
                );
                unhealthy.push((key.clone(), reason));
            }
        }
    }

    let actions = if unhealthy.is_empty() {
        Vec::new()
    } else {
        vec![HealthAction::RefreshConnections]
    };

    HealthReport {
        thresholds,
        total: connections.len(),
        healthy,
        unhealthy,
        actions,
    }
}
