//! In-process transport used by tests and dry runs.
//!
//! Every `open` is recorded and can be driven by hand: push inbound text,
//! simulate a remote close, or inspect what the manager sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::transport::{
    ManagerEvent, ManagerEventSender, Transport, TransportEvent, TransportEventKind,
    TransportFactory, TransportTag,
};

/// How newly opened memory transports behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Report `Opened` immediately.
    Succeed,
    /// Report `Failed` immediately.
    Fail,
    /// Report nothing until the test drives it.
    Hang,
}

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<MemoryConnection>>,
    builds: AtomicUsize,
}

/// Factory producing [`MemoryConnection`]s.
#[derive(Clone)]
pub struct MemoryTransportFactory {
    keep_alive: Duration,
    behavior: Arc<Mutex<OpenBehavior>>,
    recorder: Arc<Recorder>,
}

impl MemoryTransportFactory {
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            keep_alive,
            behavior: Arc::new(Mutex::new(OpenBehavior::Succeed)),
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Change how subsequent opens behave. Shared with rebuilt factories.
    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Every transport opened so far, oldest first.
    pub fn opened(&self) -> Vec<MemoryConnection> {
        self.recorder.opened.lock().clone()
    }

    /// Most recent transport opened for `relay_url`.
    pub fn latest(&self, relay_url: &str) -> Option<MemoryConnection> {
        self.recorder
            .opened
            .lock()
            .iter()
            .rev()
            .find(|c| c.url == relay_url)
            .cloned()
    }

    /// Number of opens so far.
    pub fn open_count(&self) -> usize {
        self.recorder.opened.lock().len()
    }

    /// Number of times `with_keep_alive` rebuilt this factory.
    pub fn rebuild_count(&self) -> usize {
        self.recorder.builds.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&self, url: &str, tag: TransportTag, events: ManagerEventSender) -> Box<dyn Transport> {
        let connection = MemoryConnection {
            url: url.to_string(),
            tag,
            keep_alive: self.keep_alive,
            events,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };

        match *self.behavior.lock() {
            OpenBehavior::Succeed => connection.emit(TransportEventKind::Opened),
            OpenBehavior::Fail => connection.emit(TransportEventKind::Failed {
                error: "connection refused".to_string(),
            }),
            OpenBehavior::Hang => {}
        }

        self.recorder.opened.lock().push(connection.clone());
        Box::new(connection)
    }

    fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn with_keep_alive(&self, keep_alive: Duration) -> Arc<dyn TransportFactory> {
        self.recorder.builds.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            keep_alive,
            behavior: self.behavior.clone(),
            recorder: self.recorder.clone(),
        })
    }
}

/// One recorded memory transport.
#[derive(Clone)]
pub struct MemoryConnection {
    pub url: String,
    pub tag: TransportTag,
    pub keep_alive: Duration,
    events: ManagerEventSender,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Frames the manager sent on this transport.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an inbound text frame.
    pub fn push_message(&self, text: impl Into<String>) {
        self.emit(TransportEventKind::Message(text.into()));
    }

    /// Report the handshake as complete.
    pub fn push_open(&self) {
        self.emit(TransportEventKind::Opened);
    }

    /// Simulate the relay closing the socket.
    pub fn push_remote_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.emit(TransportEventKind::Closed {
            reason: "closed by relay".to_string(),
        });
    }

    /// Simulate an I/O failure.
    pub fn push_failure(&self, error: &str) {
        self.closed.store(true, Ordering::SeqCst);
        self.emit(TransportEventKind::Failed {
            error: error.to_string(),
        });
    }

    fn emit(&self, kind: TransportEventKind) {
        let _ = self.events.send(ManagerEvent::Transport(TransportEvent {
            tag: self.tag.clone(),
            kind,
        }));
    }
}

impl Transport for MemoryConnection {
    fn send(&self, text: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent.lock().push(text);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::status::ConnectionKey;
    use tokio::sync::mpsc;

    fn tag(generation: u64) -> TransportTag {
        TransportTag {
            key: ConnectionKey::new("cfg", "wss://relay.example.com"),
            generation,
        }
    }

    #[test]
    fn test_open_reports_opened() {
        let factory = MemoryTransportFactory::new(Duration::from_secs(30));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = factory.open("wss://relay.example.com", tag(1), tx);

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ManagerEvent::Transport(TransportEvent {
                tag: tag(1),
                kind: TransportEventKind::Opened,
            })
        );

        assert!(transport.send("hello".to_string()));
        assert_eq!(factory.latest("wss://relay.example.com").unwrap().sent(), vec!["hello"]);

        transport.close();
        assert!(!transport.send("again".to_string()));
    }

    #[test]
    fn test_fail_behavior() {
        let factory = MemoryTransportFactory::new(Duration::from_secs(30));
        factory.set_behavior(OpenBehavior::Fail);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _t = factory.open("wss://relay.example.com", tag(1), tx);

        match rx.try_recv().unwrap() {
            ManagerEvent::Transport(e) => {
                assert!(matches!(e.kind, TransportEventKind::Failed { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rebuild_shares_recorder() {
        let factory = MemoryTransportFactory::new(Duration::from_secs(30));
        let rebuilt = factory.with_keep_alive(Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let _t = rebuilt.open("wss://relay.example.com", tag(2), tx);

        assert_eq!(factory.rebuild_count(), 1);
        assert_eq!(factory.open_count(), 1);
        assert_eq!(
            factory.latest("wss://relay.example.com").unwrap().keep_alive,
            Duration::from_secs(60)
        );
    }
}
