//! Adaptive relay subscription engine.
//!
//! Keeps long-lived subscriptions open against a set of Nostr relays on
//! behalf of user-defined configurations, and delivers matching events to a
//! notification dispatcher. The engine adapts to power and network
//! conditions and resumes from a per-relay watermark after reconnects.
//!
//! # Modules
//!
//! - [`relay`] - Connection manager, transports, backoff and URL normalization
//! - [`ledger`] - Persistent per-(subscription, relay) watermarks
//! - [`pipeline`] - Bounded message queue and frame processing
//! - [`seen`] - Bounded FIFO cache of delivered event ids
//! - [`health`] - Adaptive thresholds, evaluation and the periodic monitor
//! - [`power`] - Power states, battery bands and guarded resources
//! - [`collab`] - Configuration source, dispatcher and network signal
//! - [`engine`] - Wiring and lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  REQ / CLOSE   ┌──────────────┐
//! │ ConnectionManager├───────────────▶│   Relays     │
//! └──┬───────▲───────┘                └──────┬───────┘
//!    │       │ ManagerEvent                  │ frames
//!    │       │                               ▼
//!    │   ┌───┴─────────────┐  enqueue ┌──────────────┐
//!    │   │ MessagePipeline │◀─────────┤  Transports  │
//!    │   └───┬─────────────┘          └──────────────┘
//!    │       │ watermark / seen / keywords
//!    │       ▼
//!    │   ┌─────────────────┐   ┌────────────────────────┐
//!    │   │SubscriptionLedger│  │ NotificationDispatcher │
//!    │   └─────────────────┘   └────────────────────────┘
//!    │
//!    │ snapshot / refresh
//! ┌──▼──────────────┐   thresholds   ┌──────────────┐
//! │  HealthMonitor  │◀───────────────┤ PowerPolicy  │
//! └─────────────────┘                └──────────────┘
//! ```
//!
//! The ledger is the source of truth for where each relay subscription
//! resumes; the seen-event cache only suppresses the overlap at the
//! watermark boundary.

pub mod bus;
pub mod collab;
pub mod engine;
pub mod error;
pub mod health;
pub mod ledger;
pub mod pipeline;
pub mod power;
pub mod relay;
pub mod seen;

pub use error::{Error, Result};

pub use bus::{EngineEvent, EventBus};
pub use collab::{
    BusDispatcher, ConfigurationStore, FileConfigurationStore, NetworkQuality, NetworkSignal,
    NotificationDispatcher, StaticConfigurationStore, StaticNetworkSignal,
};
pub use engine::{Collaborators, Engine, EngineSettings};
pub use health::{HealthMonitor, HealthMonitorConfig, HealthReport, HealthThresholds};
pub use ledger::{KvStore, LedgerConfig, MemoryStore, SqliteStore, SubscriptionLedger};
pub use pipeline::{MessagePipeline, PipelineConfig};
pub use power::{Importance, PowerPolicy, PowerSnapshot, PowerState};
pub use relay::{
    ConnectionKey, ConnectionManager, ConnectionManagerConfig, ConnectionState, RelayHealth,
    WsTransportFactory,
};
pub use seen::SeenEventCache;
