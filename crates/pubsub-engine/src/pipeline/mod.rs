//! Message pipeline: queue, decode, validate, dedupe, filter, dispatch.
//!
//! # Architecture
//!
//! ```text
//! transport text ──► enqueue ──► [bounded FIFO] ──► worker (batches)
//!                       │                              │
//!                 drop oldest                          ▼
//!                 on overflow               RelayFrame::parse
//!                                                      │
//!            ┌─────────────┬──────────────┬────────────┼──────────┐
//!            ▼             ▼              ▼            ▼          ▼
//!          EVENT         EOSE          CLOSED       NOTICE     OK/UNKNOWN
//!            │             │              │            │          │
//!   active sub? config?    confirm      unconfirm     log        log
//!   structure? seen?
//!            │
//!   mark seen, advance watermark, keywords ──► dispatcher
//! ```
//!
//! Frames are processed by a single worker in arrival order. Nothing here
//! applies back-pressure to transports: when the queue is full the oldest
//! entry is shed.

pub mod destination;
pub mod keyword;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pubsub_core::{Configuration, RelayEvent, RelayFrame};
use tokio::sync::{Notify, watch};

use crate::bus::{EngineEvent, EventBus};
use crate::collab::{ConfigurationStore, NotificationDispatcher};
use crate::ledger::SubscriptionLedger;
use crate::power::{Importance, PowerPolicy};
use crate::relay::{ManagerEvent, ManagerEventSender};
use crate::seen::SeenEventCache;

pub use destination::{MAX_INLINE_EVENT_BYTES, destination_uri};
pub use keyword::{KeywordMatcher, MAX_CONTENT_CHARS, keyword_match};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default frames processed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default pause between batches.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(50);

/// Upper bound on the resource guard held around one dispatch.
const DISPATCH_GUARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }
}

/// One inbound text frame awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub raw: String,
    /// Subscription the receiving connection was opened for.
    pub subscription_id: String,
    pub relay_url: String,
}

/// Why an EVENT was dropped before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InactiveSubscription,
    MissingConfiguration,
    DisabledConfiguration,
    InvalidEvent,
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InactiveSubscription => "inactive_subscription",
            Self::MissingConfiguration => "missing_configuration",
            Self::DisabledConfiguration => "disabled_configuration",
            Self::InvalidEvent => "invalid_event",
            Self::Duplicate => "duplicate",
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Dispatched { event_id: String },
    KeywordMiss { event_id: String },
    Dropped(DropReason),
    Confirmed,
    Closed,
    Notice,
    Ok,
    Unknown,
    Malformed,
}

/// Summary of one `drain` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Size of each batch, in order.
    pub batches: Vec<usize>,
    pub outcomes: Vec<FrameOutcome>,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.batches.iter().sum()
    }

    pub fn dispatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FrameOutcome::Dispatched { .. }))
            .count()
    }
}

/// Everything the pipeline reads from or writes to.
pub struct PipelineDeps {
    pub ledger: Arc<SubscriptionLedger>,
    pub seen: Arc<SeenEventCache>,
    pub configurations: Arc<dyn ConfigurationStore>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub power: Arc<PowerPolicy>,
    pub manager_events: ManagerEventSender,
    pub bus: EventBus,
}

pub struct MessagePipeline {
    config: PipelineConfig,
    deps: PipelineDeps,
    queue: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    /// Compiled keyword matchers by configuration id.
    matchers: Mutex<HashMap<String, Arc<KeywordMatcher>>>,
}

impl MessagePipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            config: PipelineConfig {
                queue_capacity: capacity,
                batch_size: config.batch_size.max(1),
                ..config
            },
            deps,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            matchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Queue a frame for the worker. Never blocks.
    ///
    /// Returns false if the queue was full and its oldest entry was dropped
    /// to make room.
    pub fn enqueue(&self, message: QueuedMessage) -> bool {
        let (shed, depth) = {
            let mut queue = self.queue.lock();
            let shed = if queue.len() >= self.config.queue_capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message);
            (shed, queue.len())
        };

        metrics::gauge!("pipeline_queue_depth").set(depth as f64);
        self.notify.notify_one();

        match shed {
            Some(dropped) => {
                metrics::counter!("pipeline_queue_overflow_total").increment(1);
                tracing::warn!(
                    relay = %dropped.relay_url,
                    subscription = %dropped.subscription_id,
                    "Pipeline queue full ({}), dropped oldest frame",
                    self.config.queue_capacity
                );
                false
            }
            None => true,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    fn take_batch(&self) -> Vec<QueuedMessage> {
        let mut queue = self.queue.lock();
        let n = self.config.batch_size.min(queue.len());
        let batch: Vec<QueuedMessage> = queue.drain(..n).collect();
        metrics::gauge!("pipeline_queue_depth").set(queue.len() as f64);
        batch
    }

    /// Process everything queued, one batch at a time with a pause between
    /// batches.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                break;
            }
            report.batches.push(batch.len());
            for message in &batch {
                report.outcomes.push(self.process_frame(message));
            }

            if self.queue_len() == 0 {
                break;
            }
            tokio::time::sleep(self.config.batch_pause).await;
        }
        report
    }

    /// Single consumer loop. Returns once `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Pipeline worker started (capacity {}, batch {})",
            self.config.queue_capacity,
            self.config.batch_size
        );
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    let report = self.drain().await;
                    if report.processed() > 0 {
                        tracing::trace!(
                            "Drained {} frames in {} batches",
                            report.processed(),
                            report.batches.len()
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Pipeline worker stopped");
    }

    // =========================================================================
    // Frame handling
    // =========================================================================

    /// Decode and act on one frame.
    pub fn process_frame(&self, message: &QueuedMessage) -> FrameOutcome {
        let frame = match RelayFrame::parse(&message.raw) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!("pipeline_frames_malformed_total").increment(1);
                tracing::warn!(relay = %message.relay_url, "Dropping malformed frame: {}", e);
                return FrameOutcome::Malformed;
            }
        };
        metrics::counter!("pipeline_frames_total", "kind" => frame.kind().as_str()).increment(1);

        match frame {
            RelayFrame::Event {
                subscription_id,
                event,
            } => self.handle_event(&subscription_id, &message.relay_url, &event),
            RelayFrame::Eose { subscription_id } => {
                tracing::debug!(
                    relay = %message.relay_url,
                    subscription = %subscription_id,
                    "End of stored events"
                );
                self.confirm(&subscription_id, &message.relay_url);
                FrameOutcome::Confirmed
            }
            RelayFrame::Closed {
                subscription_id,
                message: reason,
            } => {
                tracing::warn!(
                    relay = %message.relay_url,
                    subscription = %subscription_id,
                    "Relay closed subscription: {}",
                    reason
                );
                let _ = self
                    .deps
                    .manager_events
                    .send(ManagerEvent::SubscriptionClosed {
                        subscription_id,
                        relay_url: message.relay_url.clone(),
                        message: reason,
                    });
                FrameOutcome::Closed
            }
            RelayFrame::Notice { message: notice } => {
                tracing::info!(relay = %message.relay_url, "Relay notice: {}", notice);
                self.deps.bus.publish(EngineEvent::Notice {
                    relay_url: message.relay_url.clone(),
                    message: notice,
                });
                FrameOutcome::Notice
            }
            RelayFrame::Ok {
                event_id,
                accepted,
                message: reason,
            } => {
                tracing::debug!(
                    relay = %message.relay_url,
                    event = %event_id,
                    accepted,
                    "OK: {}",
                    reason
                );
                FrameOutcome::Ok
            }
            RelayFrame::Unknown { label } => {
                tracing::debug!(
                    relay = %message.relay_url,
                    "Ignoring unknown frame {}",
                    label.as_deref().unwrap_or("<non-string label>")
                );
                FrameOutcome::Unknown
            }
        }
    }

    fn handle_event(
        &self,
        subscription_id: &str,
        relay_url: &str,
        value: &serde_json::Value,
    ) -> FrameOutcome {
        let ledger = &self.deps.ledger;

        if !ledger.is_active(subscription_id, relay_url) {
            return self.drop_event(DropReason::InactiveSubscription, subscription_id, relay_url);
        }
        self.confirm(subscription_id, relay_url);

        let Some(configuration) = ledger
            .configuration_id(subscription_id, relay_url)
            .and_then(|id| self.deps.configurations.by_id(&id))
        else {
            return self.drop_event(DropReason::MissingConfiguration, subscription_id, relay_url);
        };
        if !configuration.enabled {
            return self.drop_event(DropReason::DisabledConfiguration, subscription_id, relay_url);
        }

        let event = match RelayEvent::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                tracing::trace!(relay = %relay_url, "Invalid event structure: {}", e);
                return self.drop_event(DropReason::InvalidEvent, subscription_id, relay_url);
            }
        };

        if !self.deps.seen.mark_seen(&event.id) {
            return self.drop_event(DropReason::Duplicate, subscription_id, relay_url);
        }
        ledger.advance_watermark(subscription_id, relay_url, event.created_at);

        if let Some(matcher) = self.keyword_matcher(&configuration)
            && !matcher.matches(&event.content)
        {
            tracing::trace!(
                event = %event.id,
                configuration = %configuration.id,
                "Event did not match keywords"
            );
            return FrameOutcome::KeywordMiss { event_id: event.id };
        }

        let uri = destination_uri(&configuration.destination, &event);
        let _guard = self.deps.power.acquire_guarded_resource(
            "dispatch",
            DISPATCH_GUARD_TIMEOUT,
            Importance::High,
        );
        self.deps.dispatcher.show(&event, &uri, &configuration);
        metrics::counter!("pipeline_events_dispatched_total").increment(1);

        FrameOutcome::Dispatched { event_id: event.id }
    }

    /// The cached matcher for `configuration`, rebuilt when its keywords
    /// change. `None` when the configuration has no keyword filter.
    pub fn keyword_matcher(&self, configuration: &Configuration) -> Option<Arc<KeywordMatcher>> {
        let Some(keywords) = configuration.keywords() else {
            self.matchers.lock().remove(&configuration.id);
            return None;
        };

        let mut matchers = self.matchers.lock();
        if let Some(matcher) = matchers.get(&configuration.id)
            && matcher.keywords().iter().map(String::as_str).eq(keywords.iter().copied())
        {
            return Some(matcher.clone());
        }
        let matcher = Arc::new(KeywordMatcher::new(&keywords));
        matchers.insert(configuration.id.clone(), matcher.clone());
        Some(matcher)
    }

    fn confirm(&self, subscription_id: &str, relay_url: &str) {
        let _ = self
            .deps
            .manager_events
            .send(ManagerEvent::SubscriptionConfirmed {
                subscription_id: subscription_id.to_string(),
                relay_url: relay_url.to_string(),
            });
    }

    fn drop_event(&self, reason: DropReason, subscription_id: &str, relay_url: &str) -> FrameOutcome {
        metrics::counter!("pipeline_events_dropped_total", "reason" => reason.as_str()).increment(1);
        tracing::trace!(
            relay = %relay_url,
            subscription = %subscription_id,
            reason = reason.as_str(),
            "Dropped event"
        );
        FrameOutcome::Dropped(reason)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collab::StaticConfigurationStore;
    use crate::ledger::{LedgerConfig, MemoryStore};
    use nostr::{Filter, Kind};
    use pubsub_core::Configuration;
    use serde_json::json;
    use tokio::sync::mpsc;

    pub(crate) const RELAY: &str = "wss://relay.example.com";

    #[derive(Default)]
    pub(crate) struct RecordingDispatcher {
        pub(crate) shown: Mutex<Vec<(String, String, String)>>,
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn show(&self, event: &RelayEvent, destination_uri: &str, configuration: &Configuration) {
            self.shown.lock().push((
                event.id.clone(),
                destination_uri.to_string(),
                configuration.id.clone(),
            ));
        }
    }

    pub(crate) fn event_frame(subscription_id: &str, id_char: char, created_at: u64, content: &str) -> String {
        json!([
            "EVENT",
            subscription_id,
            {
                "id": id_char.to_string().repeat(64),
                "pubkey": "b".repeat(64),
                "created_at": created_at,
                "kind": 1,
                "tags": [],
                "content": content,
                "sig": "c".repeat(128)
            }
        ])
        .to_string()
    }

    fn configuration(id: &str, enabled: bool, keywords: Option<Vec<&str>>) -> Configuration {
        Configuration {
            id: id.to_string(),
            enabled,
            relay_urls: vec![RELAY.to_string()],
            filter: Filter::new().kind(Kind::TextNote),
            destination: "https://example.com/in".to_string(),
            subscription_id: format!("sub-{}", id),
            keyword_filter: keywords.map(|k| k.into_iter().map(String::from).collect()),
        }
    }

    struct Harness {
        pipeline: MessagePipeline,
        ledger: Arc<SubscriptionLedger>,
        configs: Arc<StaticConfigurationStore>,
        dispatcher: Arc<RecordingDispatcher>,
        events: mpsc::UnboundedReceiver<ManagerEvent>,
    }

    fn harness(config: PipelineConfig) -> Harness {
        let ledger = Arc::new(SubscriptionLedger::new(
            Arc::new(MemoryStore::new()),
            LedgerConfig::default(),
        ));
        let configs = Arc::new(StaticConfigurationStore::new(vec![configuration(
            "cfg", true, None,
        )]));
        ledger.register("sub-cfg", "cfg", &Filter::new().kind(Kind::TextNote), RELAY);

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = MessagePipeline::new(
            config,
            PipelineDeps {
                ledger: ledger.clone(),
                seen: Arc::new(SeenEventCache::new(100)),
                configurations: configs.clone(),
                dispatcher: dispatcher.clone(),
                power: Arc::new(PowerPolicy::default()),
                manager_events: tx,
                bus: EventBus::new(),
            },
        );
        Harness {
            pipeline,
            ledger,
            configs,
            dispatcher,
            events: rx,
        }
    }

    fn queued(raw: String) -> QueuedMessage {
        QueuedMessage {
            raw,
            subscription_id: "sub-cfg".to_string(),
            relay_url: RELAY.to_string(),
        }
    }

    // =========================================================================
    // EVENT handling
    // =========================================================================

    #[tokio::test]
    async fn test_valid_event_dispatched() {
        let h = harness(PipelineConfig::default());
        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1000, "hello")));

        assert_eq!(
            outcome,
            FrameOutcome::Dispatched {
                event_id: "a".repeat(64)
            }
        );
        assert_eq!(h.ledger.watermark("sub-cfg", RELAY), Some(1000));

        let shown = h.dispatcher.shown.lock();
        assert_eq!(shown.len(), 1);
        assert!(shown[0].1.starts_with("https://example.com/in?id=aaaa"));
        assert_eq!(shown[0].2, "cfg");
    }

    #[tokio::test]
    async fn test_event_confirms_subscription() {
        let mut h = harness(PipelineConfig::default());
        h.pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1000, "hello")));
        assert_eq!(
            h.events.try_recv().unwrap(),
            ManagerEvent::SubscriptionConfirmed {
                subscription_id: "sub-cfg".to_string(),
                relay_url: RELAY.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_inactive_subscription_dropped() {
        let h = harness(PipelineConfig::default());
        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("other-sub", 'a', 1000, "hello")));
        assert_eq!(outcome, FrameOutcome::Dropped(DropReason::InactiveSubscription));
        assert!(h.dispatcher.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_configuration_dropped() {
        let h = harness(PipelineConfig::default());
        h.configs.replace(vec![configuration("cfg", false, None)]);
        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1000, "hello")));
        assert_eq!(outcome, FrameOutcome::Dropped(DropReason::DisabledConfiguration));
        assert_eq!(h.ledger.watermark("sub-cfg", RELAY), None);
    }

    #[tokio::test]
    async fn test_missing_configuration_dropped() {
        let h = harness(PipelineConfig::default());
        h.configs.replace(vec![]);
        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1000, "hello")));
        assert_eq!(outcome, FrameOutcome::Dropped(DropReason::MissingConfiguration));
    }

    #[tokio::test]
    async fn test_invalid_event_dropped() {
        let h = harness(PipelineConfig::default());
        let raw = json!(["EVENT", "sub-cfg", {"id": "short", "content": "x"}]).to_string();
        assert_eq!(
            h.pipeline.process_frame(&queued(raw)),
            FrameOutcome::Dropped(DropReason::InvalidEvent)
        );
    }

    #[tokio::test]
    async fn test_duplicate_dropped() {
        let h = harness(PipelineConfig::default());
        let raw = event_frame("sub-cfg", 'a', 1000, "hello");
        assert!(matches!(
            h.pipeline.process_frame(&queued(raw.clone())),
            FrameOutcome::Dispatched { .. }
        ));
        assert_eq!(
            h.pipeline.process_frame(&queued(raw)),
            FrameOutcome::Dropped(DropReason::Duplicate)
        );
        assert_eq!(h.dispatcher.shown.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_miss_still_advances_watermark() {
        let h = harness(PipelineConfig::default());
        h.configs
            .replace(vec![configuration("cfg", true, Some(vec!["bitcoin"]))]);

        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1234, "just rust")));
        assert!(matches!(outcome, FrameOutcome::KeywordMiss { .. }));
        assert_eq!(h.ledger.watermark("sub-cfg", RELAY), Some(1234));
        assert!(h.dispatcher.shown.lock().is_empty());

        let outcome = h
            .pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'b', 1235, "Bitcoin news")));
        assert!(matches!(outcome, FrameOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn test_keyword_matcher_cached_until_keywords_change() {
        let h = harness(PipelineConfig::default());
        let bitcoin = configuration("cfg", true, Some(vec!["bitcoin"]));
        assert!(h.pipeline.keyword_matcher(&configuration("cfg", true, None)).is_none());

        let first = h.pipeline.keyword_matcher(&bitcoin).unwrap();
        let again = h.pipeline.keyword_matcher(&bitcoin).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let changed = h
            .pipeline
            .keyword_matcher(&configuration("cfg", true, Some(vec!["#nostr"])))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert!(changed.matches("hello #nostr"));

        // Reused across events
        h.configs.replace(vec![bitcoin.clone()]);
        h.pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'a', 1000, "bitcoin")));
        let cached = h.pipeline.keyword_matcher(&bitcoin).unwrap();
        h.pipeline
            .process_frame(&queued(event_frame("sub-cfg", 'b', 1001, "bitcoin")));
        assert!(Arc::ptr_eq(&cached, &h.pipeline.keyword_matcher(&bitcoin).unwrap()));
    }

    // =========================================================================
    // Other frames
    // =========================================================================

    #[tokio::test]
    async fn test_malformed_and_unknown_frames() {
        let h = harness(PipelineConfig::default());
        assert_eq!(h.pipeline.process_frame(&queued("not json".into())), FrameOutcome::Malformed);
        assert_eq!(
            h.pipeline.process_frame(&queued(r#"["AUTH","challenge"]"#.into())),
            FrameOutcome::Unknown
        );
        assert_eq!(
            h.pipeline.process_frame(&queued(r#"["NOTICE","slow down"]"#.into())),
            FrameOutcome::Notice
        );
        assert_eq!(
            h.pipeline.process_frame(&queued(r#"["OK","abc",true,""]"#.into())),
            FrameOutcome::Ok
        );
    }

    #[tokio::test]
    async fn test_closed_frame_reported_to_manager() {
        let mut h = harness(PipelineConfig::default());
        assert_eq!(
            h.pipeline
                .process_frame(&queued(r#"["CLOSED","sub-cfg","rate-limited"]"#.into())),
            FrameOutcome::Closed
        );
        assert_eq!(
            h.events.try_recv().unwrap(),
            ManagerEvent::SubscriptionClosed {
                subscription_id: "sub-cfg".to_string(),
                relay_url: RELAY.to_string(),
                message: "rate-limited".to_string(),
            }
        );
    }

    // =========================================================================
    // Queue
    // =========================================================================

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let h = harness(PipelineConfig {
            queue_capacity: 3,
            ..Default::default()
        });
        for i in 0..3 {
            assert!(h.pipeline.enqueue(queued(format!("frame-{}", i))));
        }
        assert!(!h.pipeline.enqueue(queued("frame-3".to_string())));
        assert_eq!(h.pipeline.queue_len(), 3);

        let batch = h.pipeline.take_batch();
        let raws: Vec<&str> = batch.iter().map(|m| m.raw.as_str()).collect();
        assert_eq!(raws, vec!["frame-1", "frame-2", "frame-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_in_batches_with_pause() {
        let h = harness(PipelineConfig {
            batch_size: 10,
            batch_pause: Duration::from_millis(200),
            ..Default::default()
        });
        for i in 0..15u64 {
            let id = char::from_digit((i % 16) as u32, 16).unwrap();
            h.pipeline
                .enqueue(queued(event_frame("sub-cfg", id, 1000 + i, "hi")));
        }

        let start = tokio::time::Instant::now();
        let report = h.pipeline.drain().await;
        assert_eq!(report.batches, vec![10, 5]);
        assert_eq!(report.dispatched(), 15);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(h.pipeline.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_arrival_order_preserved() {
        let h = harness(PipelineConfig::default());
        for (c, ts) in [('a', 3), ('b', 1), ('c', 2)] {
            h.pipeline.enqueue(queued(event_frame("sub-cfg", c, ts, "x")));
        }
        h.pipeline.drain().await;

        let order: Vec<char> = h
            .dispatcher
            .shown
            .lock()
            .iter()
            .map(|(id, _, _)| id.chars().next().unwrap())
            .collect();
        assert_eq!(order, vec!['a', 'b', 'c']);
        assert_eq!(h.ledger.watermark("sub-cfg", RELAY), Some(3));
    }
}
