//! Connection manager: one connection per (configuration, relay).
//!
//! The manager owns every connection's lifecycle:
//!
//! - open a transport and, once it reports `Opened`, send `REQ` with the
//!   ledger's relay-specific filter
//! - on close or failure, schedule a reconnect with exponential backoff
//! - on `refresh`, tear everything down and reopen regardless of backoff
//! - on keep-alive changes, rebuild the transport factory when the change
//!   is large enough to matter
//!
//! Transports report through the [`ManagerEvent`] channel; the manager never
//! hands out callbacks. Every transport open gets a fresh generation number
//! and events carrying an older generation are ignored, which keeps exactly
//! one live socket per pair even while old sockets are still shutting down.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use nostr::Filter;
use parking_lot::{Mutex, RwLock};
use pubsub_core::filter::is_subscribable;
use pubsub_core::{Configuration, encode_close, encode_req};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::backoff::BackoffConfig;
use super::status::{ConnectionKey, ConnectionState, RelayHealth};
use super::task::PendingTask;
use super::transport::{
    ManagerEvent, ManagerEventSender, Transport, TransportEvent, TransportEventKind,
    TransportFactory, TransportTag,
};
use crate::bus::{EngineEvent, EventBus};
use crate::collab::ConfigurationStore;
use crate::health::ConnectionControl;
use crate::ledger::SubscriptionLedger;
use crate::pipeline::{MessagePipeline, QueuedMessage};

/// Keep-alive changes smaller than this are absorbed without reconnecting.
pub const DEFAULT_KEEP_ALIVE_MINOR_THRESHOLD: Duration = Duration::from_secs(30);

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub backoff: BackoffConfig,
    pub keep_alive_minor_threshold: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            keep_alive_minor_threshold: DEFAULT_KEEP_ALIVE_MINOR_THRESHOLD,
        }
    }
}

/// Counts from one `sync` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

struct Connection {
    subscription_id: String,
    filter: Filter,
    transport: Option<Box<dyn Transport>>,
    generation: u64,
    state: ConnectionState,
    reconnect_attempts: u32,
    pending_reconnect: Option<PendingTask>,
    /// Identifies the pending reconnect; a timer holding any other value is
    /// stale. Zero when none is pending.
    reconnect_token: u64,
    /// REQ sent on the current transport.
    subscription_sent: bool,
    subscription_confirmed: bool,
    last_activity: Instant,
}

impl Connection {
    fn new(configuration: &Configuration) -> Self {
        Self {
            subscription_id: configuration.subscription_id.clone(),
            filter: configuration.filter.clone(),
            transport: None,
            generation: 0,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            pending_reconnect: None,
            reconnect_token: 0,
            subscription_sent: false,
            subscription_confirmed: false,
            last_activity: Instant::now(),
        }
    }

    fn cancel_reconnect(&mut self) {
        self.reconnect_token = 0;
        if let Some(task) = self.pending_reconnect.take() {
            task.cancel();
        }
    }

    /// CLOSE the subscription if one is active, then drop the transport.
    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            if self.subscription_sent {
                transport.send(encode_close(&self.subscription_id));
            }
            transport.close();
        }
        self.subscription_sent = false;
        self.subscription_confirmed = false;
    }
}

struct Inner {
    config: ConnectionManagerConfig,
    factory: RwLock<Arc<dyn TransportFactory>>,
    connections: Mutex<HashMap<ConnectionKey, Connection>>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
    ledger: Arc<SubscriptionLedger>,
    configurations: Arc<dyn ConfigurationStore>,
    pipeline: Arc<MessagePipeline>,
    events: ManagerEventSender,
    bus: EventBus,
}

/// Dependencies handed to [`ConnectionManager::new`].
pub struct ConnectionManagerDeps {
    pub factory: Arc<dyn TransportFactory>,
    pub ledger: Arc<SubscriptionLedger>,
    pub configurations: Arc<dyn ConfigurationStore>,
    pub pipeline: Arc<MessagePipeline>,
    pub events: ManagerEventSender,
    pub bus: EventBus,
}

/// Cloneable handle; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig, deps: ConnectionManagerDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory: RwLock::new(deps.factory),
                connections: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                ledger: deps.ledger,
                configurations: deps.configurations,
                pipeline: deps.pipeline,
                events: deps.events,
                bus: deps.bus,
            }),
        }
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Open a connection for every (enabled configuration, relay) pair that
    /// lacks one. Returns the number opened.
    pub fn connect_all(&self) -> usize {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return 0;
        }
        let mut opened = 0;
        for configuration in self.inner.configurations.enabled_configurations() {
            for relay_url in &configuration.relay_urls {
                let key = ConnectionKey::new(&configuration.id, relay_url);
                if self.inner.connections.lock().contains_key(&key) {
                    continue;
                }
                if self.connect(relay_url, &configuration) {
                    opened += 1;
                }
            }
        }
        if opened > 0 {
            tracing::info!("Opening {} relay connections", opened);
        }
        opened
    }

    /// Open (or reopen) the connection for this pair. Returns false if
    /// nothing was opened: during shutdown, or when the filter sets no
    /// constraint at all.
    pub fn connect(&self, relay_url: &str, configuration: &Configuration) -> bool {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        if !is_subscribable(&configuration.filter) {
            tracing::warn!(
                relay = %relay_url,
                configuration = %configuration.id,
                "Not connecting: filter has no constraints"
            );
            return false;
        }

        self.inner.ledger.register(
            &configuration.subscription_id,
            &configuration.id,
            &configuration.filter,
            relay_url,
        );

        let key = ConnectionKey::new(&configuration.id, relay_url);
        let mut connections = self.inner.connections.lock();
        let connection = connections
            .entry(key.clone())
            .or_insert_with(|| Connection::new(configuration));
        connection.subscription_id = configuration.subscription_id.clone();
        connection.filter = configuration.filter.clone();
        connection.cancel_reconnect();
        connection.close_transport();
        self.open_transport(&key, connection, "initial");

        metrics::gauge!("relay_connections").set(connections.len() as f64);
        true
    }

    fn open_transport(&self, key: &ConnectionKey, connection: &mut Connection, reason: &'static str) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let tag = TransportTag {
            key: key.clone(),
            generation,
        };
        let factory = self.inner.factory.read().clone();

        connection.generation = generation;
        connection.state = ConnectionState::Connecting;
        connection.subscription_sent = false;
        connection.subscription_confirmed = false;
        connection.transport = Some(factory.open(&key.relay_url, tag, self.inner.events.clone()));

        metrics::counter!("relay_connects_total", "reason" => reason).increment(1);
        tracing::debug!(
            relay = %key.relay_url,
            configuration = %key.configuration_id,
            generation,
            "Opening transport ({})",
            reason
        );
        self.publish_state(key, ConnectionState::Connecting);
    }

    // =========================================================================
    // Reconnect
    // =========================================================================

    /// Replace any pending reconnect with one after the backoff delay.
    fn schedule_reconnect(&self, key: &ConnectionKey, connection: &mut Connection) {
        connection.cancel_reconnect();
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let delay = self
            .inner
            .config
            .backoff
            .delay_for(connection.reconnect_attempts);
        connection.reconnect_attempts = connection.reconnect_attempts.saturating_add(1);

        let token = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        let task_key = key.clone();
        connection.reconnect_token = token;
        connection.pending_reconnect = Some(PendingTask::schedule(delay, async move {
            manager.reconnect_due(&task_key, token);
        }));

        metrics::counter!("relay_reconnects_scheduled_total").increment(1);
        tracing::info!(
            relay = %key.relay_url,
            configuration = %key.configuration_id,
            attempt = connection.reconnect_attempts,
            "Reconnecting in {:?}",
            delay
        );
    }

    fn reconnect_due(&self, key: &ConnectionKey, token: u64) {
        let configuration = self.inner.configurations.by_id(&key.configuration_id);

        let mut connections = self.inner.connections.lock();
        let Some(connection) = connections.get_mut(key) else {
            return;
        };
        // Superseded while waiting for the lock (refresh, reconnect, reopen)
        if connection.reconnect_token != token {
            tracing::trace!(relay = %key.relay_url, "Ignoring superseded reconnect timer");
            return;
        }
        connection.reconnect_token = 0;
        // This task is the pending one; release it without aborting ourselves
        if let Some(task) = connection.pending_reconnect.take() {
            task.detach();
        }

        match configuration {
            Some(configuration) if configuration.enabled && is_subscribable(&configuration.filter) => {
                connection.subscription_id = configuration.subscription_id.clone();
                connection.filter = configuration.filter.clone();
                connection.close_transport();
                self.open_transport(key, connection, "reconnect");
            }
            _ => {
                tracing::info!(
                    relay = %key.relay_url,
                    configuration = %key.configuration_id,
                    "Configuration gone, disabled or unsubscribable, not reconnecting"
                );
                if let Some(mut connection) = connections.remove(key) {
                    connection.close_transport();
                    self.inner
                        .ledger
                        .deactivate(&connection.subscription_id, &key.relay_url);
                }
                metrics::gauge!("relay_connections").set(connections.len() as f64);
            }
        }
    }

    /// Force-close and reopen every connection, ignoring backoff and
    /// resetting attempt counters. Returns the number refreshed.
    pub fn refresh(&self) -> usize {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return 0;
        }
        let mut connections = self.inner.connections.lock();
        for (key, connection) in connections.iter_mut() {
            connection.cancel_reconnect();
            connection.close_transport();
            connection.reconnect_attempts = 0;
            self.open_transport(key, connection, "refresh");
        }
        tracing::info!("Refreshed {} relay connections", connections.len());
        connections.len()
    }

    // =========================================================================
    // Reconciliation and teardown
    // =========================================================================

    /// Make the live connections match the enabled pairs of `desired`.
    pub fn sync(&self, desired: &[Configuration]) -> SyncReport {
        let mut wanted: HashMap<ConnectionKey, &Configuration> = HashMap::new();
        for configuration in desired.iter().filter(|c| c.enabled) {
            for relay_url in &configuration.relay_urls {
                wanted.insert(ConnectionKey::new(&configuration.id, relay_url), configuration);
            }
        }

        let live: HashSet<ConnectionKey> =
            self.inner.connections.lock().keys().cloned().collect();

        let mut report = SyncReport::default();
        for key in live.iter().filter(|k| !wanted.contains_key(*k)) {
            self.close_connection(key, "sync");
            report.removed += 1;
        }
        for (key, configuration) in &wanted {
            if live.contains(key) {
                report.unchanged += 1;
            } else if self.connect(&key.relay_url, configuration) {
                report.added += 1;
            }
        }

        tracing::info!(
            "Connection sync: +{} -{} ={}",
            report.added,
            report.removed,
            report.unchanged
        );
        report
    }

    /// Close every connection to `relay_url`. Returns the number closed.
    pub fn disconnect(&self, relay_url: &str) -> usize {
        let keys: Vec<ConnectionKey> = self
            .inner
            .connections
            .lock()
            .keys()
            .filter(|k| k.relay_url == relay_url)
            .cloned()
            .collect();
        for key in &keys {
            self.close_connection(key, "disconnect");
        }
        keys.len()
    }

    /// Close every connection. Returns the number closed.
    pub fn disconnect_all(&self) -> usize {
        let keys: Vec<ConnectionKey> = self.inner.connections.lock().keys().cloned().collect();
        for key in &keys {
            self.close_connection(key, "disconnect");
        }
        keys.len()
    }

    /// Stop all reconnects and close everything.
    pub fn shutdown(&self) -> usize {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let closed = self.disconnect_all();
        tracing::info!("Connection manager closed {} connections", closed);
        closed
    }

    fn close_connection(&self, key: &ConnectionKey, reason: &'static str) {
        let mut connections = self.inner.connections.lock();
        let Some(mut connection) = connections.remove(key) else {
            return;
        };
        connection.cancel_reconnect();
        connection.close_transport();
        self.inner
            .ledger
            .deactivate(&connection.subscription_id, &key.relay_url);

        metrics::counter!("relay_disconnects_total", "reason" => reason).increment(1);
        metrics::gauge!("relay_connections").set(connections.len() as f64);
        tracing::info!(
            relay = %key.relay_url,
            configuration = %key.configuration_id,
            "Disconnected ({})",
            reason
        );
        drop(connections);
        self.publish_state(key, ConnectionState::Disconnected);
    }

    // =========================================================================
    // Keep-alive
    // =========================================================================

    /// Apply a new keep-alive interval. Returns true if transports were
    /// rebuilt.
    pub fn update_keep_alive_interval(&self, keep_alive: Duration) -> bool {
        let current = self.inner.factory.read().keep_alive();
        if current.abs_diff(keep_alive) < self.inner.config.keep_alive_minor_threshold {
            tracing::debug!(
                "Keep-alive change {:?} -> {:?} below threshold, keeping transports",
                current,
                keep_alive
            );
            return false;
        }

        {
            let mut factory = self.inner.factory.write();
            *factory = factory.with_keep_alive(keep_alive);
        }
        metrics::counter!("relay_transport_rebuilds_total").increment(1);

        let mut connections = self.inner.connections.lock();
        let mut rebuilt = 0;
        for (key, connection) in connections.iter_mut() {
            if connection.transport.is_none() {
                // Waiting on a reconnect timer; it will pick up the new factory
                continue;
            }
            connection.close_transport();
            self.open_transport(key, connection, "keep_alive");
            rebuilt += 1;
        }
        tracing::info!(
            "Keep-alive {:?} -> {:?}, rebuilt {} transports",
            current,
            keep_alive,
            rebuilt
        );
        true
    }

    /// Keep-alive of the current transport factory.
    pub fn keep_alive_interval(&self) -> Duration {
        self.inner.factory.read().keep_alive()
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Apply one event from the manager channel.
    pub fn handle_event(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::Transport(event) => self.handle_transport_event(event),
            ManagerEvent::SubscriptionConfirmed {
                subscription_id,
                relay_url,
            } => {
                self.for_subscription(&subscription_id, &relay_url, |key, connection| {
                    if connection.state == ConnectionState::Connected
                        && !connection.subscription_confirmed
                    {
                        connection.subscription_confirmed = true;
                        tracing::debug!(
                            relay = %key.relay_url,
                            subscription = %connection.subscription_id,
                            "Subscription confirmed"
                        );
                    }
                });
            }
            ManagerEvent::SubscriptionClosed {
                subscription_id,
                relay_url,
                ..
            } => {
                self.for_subscription(&subscription_id, &relay_url, |_, connection| {
                    connection.subscription_sent = false;
                    connection.subscription_confirmed = false;
                });
            }
        }
    }

    fn for_subscription<F>(&self, subscription_id: &str, relay_url: &str, mut f: F)
    where
        F: FnMut(&ConnectionKey, &mut Connection),
    {
        let mut connections = self.inner.connections.lock();
        for (key, connection) in connections.iter_mut() {
            if key.relay_url == relay_url && connection.subscription_id == subscription_id {
                f(key, connection);
            }
        }
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        let TransportEvent { tag, kind } = event;
        let key = &tag.key;

        let mut connections = self.inner.connections.lock();
        let Some(connection) = connections.get_mut(key) else {
            return;
        };
        if connection.generation != tag.generation {
            tracing::trace!(
                relay = %key.relay_url,
                stale = tag.generation,
                current = connection.generation,
                "Ignoring event from superseded transport"
            );
            return;
        }

        match kind {
            TransportEventKind::Opened => {
                connection.state = ConnectionState::Connected;
                connection.last_activity = Instant::now();
                self.subscribe(key, connection);
                drop(connections);
                self.publish_state(key, ConnectionState::Connected);
            }
            TransportEventKind::Message(raw) => {
                connection.last_activity = Instant::now();
                let message = QueuedMessage {
                    raw,
                    subscription_id: connection.subscription_id.clone(),
                    relay_url: key.relay_url.clone(),
                };
                drop(connections);
                self.inner.pipeline.enqueue(message);
            }
            TransportEventKind::Activity => {
                connection.last_activity = Instant::now();
            }
            TransportEventKind::Closed { reason } => {
                tracing::info!(relay = %key.relay_url, "Connection closed: {}", reason);
                metrics::counter!("relay_disconnects_total", "reason" => "closed").increment(1);
                connection.transport = None;
                connection.subscription_sent = false;
                connection.subscription_confirmed = false;
                connection.state = ConnectionState::Disconnected;
                self.schedule_reconnect(key, connection);
                drop(connections);
                self.publish_state(key, ConnectionState::Disconnected);
            }
            TransportEventKind::Failed { error } => {
                tracing::warn!(relay = %key.relay_url, "Connection failed: {}", error);
                metrics::counter!("relay_disconnects_total", "reason" => "error").increment(1);
                connection.transport = None;
                connection.subscription_sent = false;
                connection.subscription_confirmed = false;
                connection.state = ConnectionState::Failed;
                self.schedule_reconnect(key, connection);
                drop(connections);
                self.publish_state(key, ConnectionState::Failed);
            }
        }
    }

    /// Send REQ on a freshly opened transport and reset backoff.
    fn subscribe(&self, key: &ConnectionKey, connection: &mut Connection) {
        if !is_subscribable(&connection.filter) {
            tracing::warn!(
                relay = %key.relay_url,
                subscription = %connection.subscription_id,
                "Not subscribing: filter has no constraints"
            );
            return;
        }

        let ledger = &self.inner.ledger;
        let filter =
            ledger.relay_specific_filter(&connection.subscription_id, &key.relay_url, &connection.filter);

        match encode_req(&connection.subscription_id, &filter) {
            Ok(req) => {
                let sent = connection
                    .transport
                    .as_ref()
                    .is_some_and(|t| t.send(req));
                connection.subscription_sent = sent;
            }
            Err(e) => {
                tracing::warn!(
                    relay = %key.relay_url,
                    subscription = %connection.subscription_id,
                    "Not subscribing: {}",
                    e
                );
            }
        }

        ledger.record_connection(
            &connection.subscription_id,
            &key.relay_url,
            connection.reconnect_attempts,
        );
        connection.reconnect_attempts = 0;

        tracing::info!(
            relay = %key.relay_url,
            subscription = %connection.subscription_id,
            "Connected"
        );
    }

    /// Consume the event channel until it closes or `shutdown` flips.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<ManagerEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Connection manager event loop stopped");
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Health of every live connection. Does not change anything.
    pub fn snapshot_health(&self) -> BTreeMap<ConnectionKey, RelayHealth> {
        let now = Instant::now();
        self.inner
            .connections
            .lock()
            .iter()
            .map(|(key, c)| {
                (
                    key.clone(),
                    RelayHealth {
                        state: c.state,
                        last_message_age_ms: now.duration_since(c.last_activity).as_millis()
                            as u64,
                        reconnect_attempts: c.reconnect_attempts,
                        subscription_confirmed: c.subscription_confirmed,
                    },
                )
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn connection_state(&self, key: &ConnectionKey) -> Option<ConnectionState> {
        self.inner.connections.lock().get(key).map(|c| c.state)
    }

    pub fn reconnect_attempts(&self, key: &ConnectionKey) -> Option<u32> {
        self.inner
            .connections
            .lock()
            .get(key)
            .map(|c| c.reconnect_attempts)
    }

    /// Delay of the pending reconnect, if one is scheduled.
    pub fn pending_reconnect_delay(&self, key: &ConnectionKey) -> Option<Duration> {
        self.inner
            .connections
            .lock()
            .get(key)
            .and_then(|c| c.pending_reconnect.as_ref())
            .filter(|t| !t.is_finished())
            .map(|t| t.delay())
    }

    fn publish_state(&self, key: &ConnectionKey, state: ConnectionState) {
        self.inner.bus.publish(EngineEvent::ConnectionStateChanged {
            configuration_id: key.configuration_id.clone(),
            relay_url: key.relay_url.clone(),
            state,
        });
    }
}

impl ConnectionControl for ConnectionManager {
    fn snapshot_health(&self) -> BTreeMap<ConnectionKey, RelayHealth> {
        ConnectionManager::snapshot_health(self)
    }

    fn refresh(&self) -> usize {
        ConnectionManager::refresh(self)
    }
}
