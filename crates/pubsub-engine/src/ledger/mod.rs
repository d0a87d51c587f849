//! Subscription ledger: per-relay resume watermarks that survive restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      SubscriptionLedger                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  - One record per (subscription id, relay URL)                  │
//! │  - Monotone watermark: newest created_at seen from that relay   │
//! │  - Builds relay-specific filters (since = watermark + 1)        │
//! │  - Purges orphaned and stale records                            │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ write-through JSON
//!                                 ▼
//!                ┌─────────────────────────────────┐
//!                │  KvStore (SqliteStore / Memory) │
//!                └─────────────────────────────────┘
//! ```

mod schema;
mod store;
mod subscriptions;

pub use store::{KvStore, MemoryStore, SqliteStore};
pub use subscriptions::{
    DEFAULT_SAFETY_BUFFER, DEFAULT_STALE_AFTER, ESTIMATED_EVENT_BYTES, LedgerConfig, ResumePath,
    SubscriptionLedger, SubscriptionRecord, ledger_key,
};
