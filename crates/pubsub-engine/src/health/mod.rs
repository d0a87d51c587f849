//! Health subsystem.
//!
//! - [`thresholds`]: limits derived from battery, keep-alive and network
//! - [`evaluator`]: per-connection healthy / unhealthy-with-reason
//! - [`orchestrator`]: aggregate check that yields at most one refresh
//! - [`monitor`]: periodic driver that applies the refresh

pub mod evaluator;
pub mod monitor;
pub mod orchestrator;
pub mod thresholds;

pub use evaluator::{UnhealthyReason, is_healthy, unhealthy_reason};
pub use monitor::{
    ConnectionControl, DEFAULT_HEALTH_INTERVAL, HealthMonitor, HealthMonitorConfig,
    MIN_HEALTH_INTERVAL, TickOutcome,
};
pub use orchestrator::{HealthAction, HealthReport, perform_health_check};
pub use thresholds::HealthThresholds;
