//! Per-(subscription, relay) bookkeeping and resume watermarks.
//!
//! The ledger answers one question on every open: "what `since` should this
//! relay get?" If we have seen events from this relay for this subscription,
//! resume one second after the newest one. Otherwise look back a short
//! safety window so a restart does not miss events published while we were
//! away.
//!
//! The in-memory map is authoritative while running and written through to
//! the [`KvStore`] on every change. Store failures are logged and counted but
//! never surface to callers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use nostr::Filter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::store::KvStore;
use pubsub_core::filter::with_since;

/// Default look-back when no watermark exists.
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(300);

/// Default idle age after which a record is purged.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Rough size of one redelivered event, for the bytes-saved estimate.
pub const ESTIMATED_EVENT_BYTES: u64 = 512;

/// Ledger tunables.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Look-back applied when a (subscription, relay) pair has no watermark.
    pub safety_buffer: Duration,
    /// Records idle longer than this are removed by `cleanup_stale`.
    pub stale_after: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Persisted form of one (subscription, relay) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub relay_url: String,
    #[serde(default)]
    pub configuration_id: String,
    /// Newest `created_at` seen from this relay (the watermark).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<u64>,
    #[serde(default)]
    pub last_connection_time_ms: u64,
    #[serde(default)]
    pub reconnect_attempts: u32,
    #[serde(default)]
    pub event_count: u64,
}

impl SubscriptionRecord {
    fn new(subscription_id: &str, configuration_id: &str, relay_url: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            relay_url: relay_url.to_string(),
            configuration_id: configuration_id.to_string(),
            last_timestamp: None,
            last_connection_time_ms: now_ms(),
            reconnect_attempts: 0,
            event_count: 0,
        }
    }

    /// Milliseconds since this record last saw an open or an event.
    fn idle_ms(&self, now_ms: u64) -> u64 {
        let last_event_ms = self.last_timestamp.unwrap_or(0).saturating_mul(1000);
        now_ms.saturating_sub(self.last_connection_time_ms.max(last_event_ms))
    }
}

/// Which branch `relay_specific_filter` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePath {
    /// `since = watermark + 1`.
    Watermark,
    /// `since = now - safety_buffer`.
    SafetyBuffer,
}

impl ResumePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Watermark => "watermark",
            Self::SafetyBuffer => "safety_buffer",
        }
    }
}

struct Entry {
    record: SubscriptionRecord,
    active: bool,
}

/// Ledger storage key for a (subscription, relay) pair.
pub fn ledger_key(subscription_id: &str, relay_url: &str) -> String {
    format!("{}:{}", subscription_id, relay_url)
}

/// The subscription ledger.
pub struct SubscriptionLedger {
    config: LedgerConfig,
    store: Arc<dyn KvStore>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn KvStore>, config: LedgerConfig) -> Self {
        Self {
            config,
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create or update the record for this pair and mark it active.
    ///
    /// An existing watermark (including one loaded from the store) is kept.
    pub fn register(
        &self,
        subscription_id: &str,
        configuration_id: &str,
        filter: &Filter,
        relay_url: &str,
    ) {
        let key = ledger_key(subscription_id, relay_url);
        let record = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                record: SubscriptionRecord::new(subscription_id, configuration_id, relay_url),
                active: false,
            });
            entry.active = true;
            entry.record.configuration_id = configuration_id.to_string();
            entry.record.clone()
        };

        tracing::debug!(
            subscription = %subscription_id,
            relay = %relay_url,
            since = ?filter.since.map(|t| t.as_secs()),
            "Registered subscription"
        );
        self.persist(&key, &record);
    }

    /// Mark the pair inactive. Its record and watermark are kept.
    pub fn deactivate(&self, subscription_id: &str, relay_url: &str) {
        if let Some(entry) = self
            .entries
            .lock()
            .get_mut(&ledger_key(subscription_id, relay_url))
        {
            entry.active = false;
        }
    }

    // =========================================================================
    // Resume
    // =========================================================================

    /// `base` with `since` chosen for this relay.
    pub fn relay_specific_filter(
        &self,
        subscription_id: &str,
        relay_url: &str,
        base: &Filter,
    ) -> Filter {
        self.relay_specific_filter_with_path(subscription_id, relay_url, base)
            .0
    }

    /// Like [`Self::relay_specific_filter`] but also reports the branch taken.
    pub fn relay_specific_filter_with_path(
        &self,
        subscription_id: &str,
        relay_url: &str,
        base: &Filter,
    ) -> (Filter, ResumePath) {
        let record = self.lookup(subscription_id, relay_url);

        let (since, path) = match record.as_ref().and_then(|r| r.last_timestamp) {
            Some(watermark) => (watermark.saturating_add(1), ResumePath::Watermark),
            None => {
                let now = now_secs();
                (
                    now.saturating_sub(self.config.safety_buffer.as_secs()),
                    ResumePath::SafetyBuffer,
                )
            }
        };

        metrics::counter!("ledger_resume_total", "path" => path.as_str()).increment(1);
        if path == ResumePath::Watermark
            && let Some(record) = &record
        {
            metrics::counter!("ledger_bytes_saved_estimate_total")
                .increment(record.event_count.saturating_mul(ESTIMATED_EVENT_BYTES));
        }

        tracing::debug!(
            subscription = %subscription_id,
            relay = %relay_url,
            since,
            path = path.as_str(),
            "Resolved relay-specific filter"
        );

        (with_since(base, since), path)
    }

    /// Raise the watermark to `created_at` if it is newer, and count the event.
    pub fn advance_watermark(&self, subscription_id: &str, relay_url: &str, created_at: u64) {
        let key = ledger_key(subscription_id, relay_url);
        let record = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            let record = &mut entry.record;
            record.last_timestamp = Some(record.last_timestamp.map_or(created_at, |w| w.max(created_at)));
            record.event_count = record.event_count.saturating_add(1);
            record.clone()
        };
        self.persist(&key, &record);
    }

    /// Note a successful open for this pair.
    pub fn record_connection(&self, subscription_id: &str, relay_url: &str, reconnect_attempts: u32) {
        let key = ledger_key(subscription_id, relay_url);
        let record = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            entry.record.last_connection_time_ms = now_ms();
            entry.record.reconnect_attempts = reconnect_attempts;
            entry.record.clone()
        };
        self.persist(&key, &record);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn watermark(&self, subscription_id: &str, relay_url: &str) -> Option<u64> {
        self.lookup(subscription_id, relay_url)
            .and_then(|r| r.last_timestamp)
    }

    pub fn configuration_id(&self, subscription_id: &str, relay_url: &str) -> Option<String> {
        self.entries
            .lock()
            .get(&ledger_key(subscription_id, relay_url))
            .map(|e| e.record.configuration_id.clone())
    }

    pub fn subscription_info(
        &self,
        subscription_id: &str,
        relay_url: &str,
    ) -> Option<SubscriptionRecord> {
        self.entries
            .lock()
            .get(&ledger_key(subscription_id, relay_url))
            .map(|e| e.record.clone())
    }

    pub fn is_active(&self, subscription_id: &str, relay_url: &str) -> bool {
        self.entries
            .lock()
            .get(&ledger_key(subscription_id, relay_url))
            .is_some_and(|e| e.active)
    }

    /// Number of records held in memory.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Removal and Maintenance
    // =========================================================================

    /// Remove one pair, or every relay of the subscription when `relay_url` is
    /// `None`. Returns the number of records removed.
    pub fn remove(&self, subscription_id: &str, relay_url: Option<&str>) -> usize {
        let removed: Vec<String> = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| {
                    e.record.subscription_id == subscription_id
                        && relay_url.is_none_or(|url| e.record.relay_url == url)
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &removed {
            self.delete(key);
        }
        removed.len()
    }

    /// Remove records whose configuration is no longer present.
    pub fn cleanup_orphans(&self, valid_configuration_ids: &HashSet<String>) -> usize {
        let removed = self.remove_where(|r| !valid_configuration_ids.contains(&r.configuration_id));
        if removed > 0 {
            tracing::info!("Removed {} orphaned subscription records", removed);
        }
        removed
    }

    /// Remove records idle longer than `stale_after`.
    pub fn cleanup_stale(&self) -> usize {
        let now = now_ms();
        let max_idle = self.config.stale_after.as_millis() as u64;
        let removed = self.remove_where(|r| r.idle_ms(now) > max_idle);
        if removed > 0 {
            tracing::info!("Removed {} stale subscription records", removed);
        }
        removed
    }

    /// Load every record from the store as inactive. Malformed records are
    /// skipped. Returns the number loaded.
    pub fn load_persisted(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                self.store_error("list keys", &e);
                return 0;
            }
        };

        let mut loaded = 0;
        for key in keys {
            let raw = match self.store.get(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    self.store_error("read record", &e);
                    continue;
                }
            };
            let record: SubscriptionRecord = match serde_json::from_str(&raw) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(key = %key, "Skipping malformed ledger record: {}", e);
                    continue;
                }
            };

            let mut entries = self.entries.lock();
            entries.entry(key).or_insert(Entry {
                record,
                active: false,
            });
            loaded += 1;
        }

        tracing::info!("Loaded {} persisted subscription records", loaded);
        loaded
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Memory first, then the store. A store error is a miss.
    fn lookup(&self, subscription_id: &str, relay_url: &str) -> Option<SubscriptionRecord> {
        let key = ledger_key(subscription_id, relay_url);
        if let Some(entry) = self.entries.lock().get(&key) {
            return Some(entry.record.clone());
        }

        match self.store.get(&key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                self.store_error("read record", &e);
                None
            }
        }
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SubscriptionRecord) -> bool,
    {
        let removed: Vec<String> = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| predicate(&e.record))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        for key in &removed {
            self.delete(key);
        }
        removed.len()
    }

    fn persist(&self, key: &str, record: &SubscriptionRecord) {
        let value = match serde_json::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, "Failed to encode ledger record: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.put(key, &value) {
            self.store_error("write record", &e);
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            self.store_error("delete record", &e);
        }
    }

    fn store_error(&self, op: &str, e: &crate::error::Error) {
        metrics::counter!("ledger_store_errors_total").increment(1);
        tracing::warn!("Ledger store failed to {}: {}", op, e);
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
