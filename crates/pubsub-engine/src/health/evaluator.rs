//! Per-connection health classification.

use std::fmt;

use super::thresholds::HealthThresholds;
use crate::relay::{ConnectionState, RelayHealth};

/// Why a connection failed its health check. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhealthyReason {
    Disconnected(ConnectionState),
    SubscriptionNotConfirmed,
    SilentTooLong,
    TooManyReconnectAttempts,
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(state) => write!(f, "disconnected ({})", state),
            Self::SubscriptionNotConfirmed => f.write_str("subscription not confirmed"),
            Self::SilentTooLong => f.write_str("silent too long"),
            Self::TooManyReconnectAttempts => f.write_str("too many reconnect attempts"),
        }
    }
}

/// The first rule `health` breaks, if any.
pub fn unhealthy_reason(
    health: &RelayHealth,
    thresholds: &HealthThresholds,
) -> Option<UnhealthyReason> {
    if health.state != ConnectionState::Connected {
        return Some(UnhealthyReason::Disconnected(health.state));
    }
    if !health.subscription_confirmed {
        return Some(UnhealthyReason::SubscriptionNotConfirmed);
    }
    if health.last_message_age_ms >= thresholds.max_silence_ms {
        return Some(UnhealthyReason::SilentTooLong);
    }
    if health.reconnect_attempts >= thresholds.max_reconnect_attempts {
        return Some(UnhealthyReason::TooManyReconnectAttempts);
    }
    None
}

/// Connected, confirmed, recently active and within the reconnect budget.
pub fn is_healthy(health: &RelayHealth, thresholds: &HealthThresholds) -> bool {
    unhealthy_reason(health, thresholds).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: HealthThresholds = HealthThresholds {
        max_silence_ms: 1_000,
        max_reconnect_attempts: 3,
        subscription_timeout_ms: 500,
    };

    fn healthy() -> RelayHealth {
        RelayHealth {
            state: ConnectionState::Connected,
            last_message_age_ms: 10,
            reconnect_attempts: 0,
            subscription_confirmed: true,
        }
    }

    #[test]
    fn test_truth_table() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Failed,
        ] {
            for confirmed in [false, true] {
                for age in [0, 999, 1_000, 5_000] {
                    for attempts in [0, 2, 3, 9] {
                        let h = RelayHealth {
                            state,
                            last_message_age_ms: age,
                            reconnect_attempts: attempts,
                            subscription_confirmed: confirmed,
                        };
                        let expected = state == ConnectionState::Connected
                            && confirmed
                            && age < T.max_silence_ms
                            && attempts < T.max_reconnect_attempts;
                        assert_eq!(is_healthy(&h, &T), expected, "{:?}", h);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reason_strings() {
        let mut h = healthy();
        assert_eq!(unhealthy_reason(&h, &T), None);

        h.reconnect_attempts = 3;
        assert_eq!(
            unhealthy_reason(&h, &T).unwrap().to_string(),
            "too many reconnect attempts"
        );

        h.last_message_age_ms = 2_000;
        assert_eq!(unhealthy_reason(&h, &T).unwrap().to_string(), "silent too long");

        h.subscription_confirmed = false;
        assert_eq!(
            unhealthy_reason(&h, &T).unwrap().to_string(),
            "subscription not confirmed"
        );

        h.state = ConnectionState::Failed;
        assert_eq!(
            unhealthy_reason(&h, &T).unwrap().to_string(),
            "disconnected (FAILED)"
        );
    }
}
