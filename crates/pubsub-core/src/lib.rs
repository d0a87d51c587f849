//! Core types and shared utilities for the pubsub relay engine.
//!
//! This crate provides:
//! - The NIP-01 wire codec (`REQ`/`CLOSE` encoding, relay frame decoding)
//! - The relay event model with structural validation
//! - Filter helpers used to derive relay-specific subscriptions
//! - The subscription configuration model
//! - Prometheus metrics helpers
//! - Shared error types

pub mod config;
mod error;
mod event;
pub mod filter;
pub mod frame;
pub mod metrics;

pub use config::{Configuration, ConfigurationFile};
pub use error::{Error, Result};
pub use event::{HEX_ID_LEN, HEX_SIG_LEN, RelayEvent};
pub use frame::{FrameKind, RelayFrame, encode_close, encode_req};

/// Re-exported so downstream crates share one filter type.
pub use nostr::{Filter, Timestamp};
