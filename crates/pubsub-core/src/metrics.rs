//! Prometheus metrics helpers for the relay engine.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pubsub_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("relay_connects_total", "reason" => "initial").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`relay_`, `pipeline_`, `ledger_`, `health_`, `power_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: low cardinality only (reason, kind, path, outcome). Never a relay
//!   URL or event id.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_engine_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_engine_metrics();
    Some(handle)
}

/// Start the `/metrics` HTTP endpoint on a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for every metric the engine records.
fn register_engine_metrics() {
    // =========================================================================
    // Connection Manager
    // =========================================================================

    describe_counter!(
        "relay_connects_total",
        "Transport opens attempted (label: reason)"
    );
    describe_counter!(
        "relay_reconnects_scheduled_total",
        "Reconnect timers scheduled after a close or failure"
    );
    describe_counter!(
        "relay_disconnects_total",
        "Connections closed (label: reason)"
    );
    describe_counter!(
        "relay_transport_rebuilds_total",
        "Shared transport rebuilds caused by keep-alive changes"
    );
    describe_gauge!("relay_connections", "Live connections owned by the manager");

    // =========================================================================
    // Message Pipeline
    // =========================================================================

    describe_counter!("pipeline_frames_total", "Frames processed (label: kind)");
    describe_counter!(
        "pipeline_frames_malformed_total",
        "Frames that failed to decode"
    );
    describe_counter!(
        "pipeline_events_dropped_total",
        "Events dropped before dispatch (label: reason)"
    );
    describe_counter!(
        "pipeline_events_dispatched_total",
        "Events handed to the notification dispatcher"
    );
    describe_counter!(
        "pipeline_queue_overflow_total",
        "Queued frames shed because the queue was full"
    );
    describe_gauge!("pipeline_queue_depth", "Frames waiting in the pipeline queue");
    describe_gauge!("seen_cache_size", "Event ids held by the seen-event cache");

    // =========================================================================
    // Subscription Ledger
    // =========================================================================

    describe_counter!(
        "ledger_resume_total",
        "Relay-specific filters built (label: path = watermark | safety_buffer)"
    );
    describe_counter!(
        "ledger_bytes_saved_estimate_total",
        "Estimated bytes of redelivery avoided by watermark resumption"
    );
    describe_counter!(
        "ledger_store_errors_total",
        "Persisted store read/write failures"
    );

    // =========================================================================
    // Health and Power
    // =========================================================================

    describe_counter!("health_checks_total", "Health checks run (label: outcome)");
    describe_gauge!(
        "health_unhealthy_connections",
        "Unhealthy connections at the last health check"
    );
    describe_gauge!(
        "power_keep_alive_seconds",
        "Keep-alive interval derived from the current power state"
    );
    describe_counter!(
        "power_guard_acquired_total",
        "Resource guards acquired (label: importance)"
    );
    describe_counter!(
        "power_guard_skipped_total",
        "Resource guard requests skipped under low battery"
    );

    describe_gauge!("engine_running", "1 while the daemon is running");
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter without labels.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}
