//! Relay connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  - One connection per (configuration id, relay URL)             │
//! │  - REQ with the ledger's relay-specific filter on open          │
//! │  - Exponential backoff reconnects (one PendingTask each)        │
//! │  - Bulk refresh on command from the health monitor              │
//! │  - Rebuilds transports on large keep-alive changes              │
//! └───────────────▲─────────────────────────────┬───────────────────┘
//!                 │ ManagerEvent (mpsc)         │ open / send / close
//!                 │                             ▼
//!         ┌───────┴─────────────────────────────────────┐
//!         │  Transport tasks (WsTransportFactory)       │
//!         └─────────────────────────────────────────────┘
//! ```

pub mod backoff;
mod manager;
pub mod memory;
mod status;
pub mod task;
pub mod transport;
pub mod url;

pub use backoff::BackoffConfig;
pub use manager::{
    ConnectionManager, ConnectionManagerConfig, ConnectionManagerDeps,
    DEFAULT_KEEP_ALIVE_MINOR_THRESHOLD, SyncReport,
};
pub use memory::{MemoryConnection, MemoryTransportFactory, OpenBehavior};
pub use status::{ConnectionKey, ConnectionState, RelayHealth};
pub use task::PendingTask;
pub use transport::{
    ManagerEvent, ManagerEventSender, Transport, TransportEvent, TransportEventKind,
    TransportFactory, TransportTag, WsTransportFactory,
};
pub use url::{NormalizeResult, normalize_relay_url};
