//! Connection identity, state and derived health.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Transport open in progress.
    Connecting,
    /// Transport open; subscription may or may not be confirmed yet.
    Connected,
    /// Closed cleanly or waiting for a reconnect.
    Disconnected,
    /// Last open attempt failed.
    Failed,
}

impl ConnectionState {
    /// Upper-case label used in logs and health reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a connection: one per (configuration, relay) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub configuration_id: String,
    pub relay_url: String,
}

impl ConnectionKey {
    pub fn new(configuration_id: impl Into<String>, relay_url: impl Into<String>) -> Self {
        Self {
            configuration_id: configuration_id.into(),
            relay_url: relay_url.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.configuration_id, self.relay_url)
    }
}

/// Point-in-time health of one connection, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayHealth {
    pub state: ConnectionState,
    /// Milliseconds since the last inbound frame, pong, or successful open.
    pub last_message_age_ms: u64,
    pub reconnect_attempts: u32,
    /// True once the relay acknowledged the subscription (EOSE or first EVENT).
    pub subscription_confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionState::Failed.as_str(), "FAILED");
    }

    #[test]
    fn test_key_ordering_and_display() {
        let a = ConnectionKey::new("a", "wss://z.example.com");
        let b = ConnectionKey::new("b", "wss://a.example.com");
        assert!(a < b);
        assert_eq!(a.to_string(), "a@wss://z.example.com");
    }

    #[test]
    fn test_health_serializes_state() {
        let health = RelayHealth {
            state: ConnectionState::Connected,
            last_message_age_ms: 5,
            reconnect_attempts: 0,
            subscription_confirmed: true,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["state"], "CONNECTED");
    }
}
