//! Relay transports.
//!
//! A transport owns one websocket and runs it on its own tokio task. It never
//! calls back into the manager; everything it observes is reported as a
//! [`TransportEvent`] on the manager's event channel, tagged with the
//! generation it was opened for so that events from a superseded socket can
//! be recognised and ignored.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::status::ConnectionKey;

/// Default websocket keep-alive (ping) interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default bound on a transport open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Which socket an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTag {
    pub key: ConnectionKey,
    pub generation: u64,
}

/// What a transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Opened,
    /// Text frame received.
    Message(String),
    /// Pong or other control traffic; counts as activity only.
    Activity,
    /// Socket closed by either side.
    Closed { reason: String },
    /// Open or I/O failed.
    Failed { error: String },
}

/// A tagged transport observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub tag: TransportTag,
    pub kind: TransportEventKind,
}

/// Everything the connection manager consumes from its event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Reported by a transport task.
    Transport(TransportEvent),
    /// The pipeline saw EOSE or a first EVENT for this subscription.
    SubscriptionConfirmed {
        subscription_id: String,
        relay_url: String,
    },
    /// The relay sent CLOSED for this subscription.
    SubscriptionClosed {
        subscription_id: String,
        relay_url: String,
        message: String,
    },
}

/// Sender half of the manager's event channel.
pub type ManagerEventSender = mpsc::UnboundedSender<ManagerEvent>;

/// Handle to an open (or opening) socket.
pub trait Transport: Send + Sync {
    /// Queue a text frame. Returns false if the socket task is gone.
    fn send(&self, text: String) -> bool;

    /// Close the socket. Idempotent.
    fn close(&self);
}

/// Builds transports that share one keep-alive setting.
pub trait TransportFactory: Send + Sync {
    /// Start opening `url`. Progress is reported on `events`.
    fn open(&self, url: &str, tag: TransportTag, events: ManagerEventSender) -> Box<dyn Transport>;

    /// Keep-alive interval this factory was built with.
    fn keep_alive(&self) -> Duration;

    /// A new factory identical to this one except for the keep-alive interval.
    fn with_keep_alive(&self, keep_alive: Duration) -> Arc<dyn TransportFactory>;
}

// =============================================================================
// WebSocket transport
// =============================================================================

/// Transport factory backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl WsTransportFactory {
    pub fn new(keep_alive: Duration, connect_timeout: Duration) -> Self {
        Self {
            keep_alive,
            connect_timeout,
        }
    }
}

impl Default for WsTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_ALIVE, DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TransportFactory for WsTransportFactory {
    fn open(&self, url: &str, tag: TransportTag, events: ManagerEventSender) -> Box<dyn Transport> {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            url.to_string(),
            tag,
            events,
            rx,
            self.keep_alive,
            self.connect_timeout,
        ));
        Box::new(WsTransport { commands })
    }

    fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn with_keep_alive(&self, keep_alive: Duration) -> Arc<dyn TransportFactory> {
        Arc::new(Self::new(keep_alive, self.connect_timeout))
    }
}

enum Command {
    Send(String),
    Close,
}

struct WsTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> bool {
        self.commands.send(Command::Send(text)).is_ok()
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run_socket(
    url: String,
    tag: TransportTag,
    events: ManagerEventSender,
    mut commands: mpsc::UnboundedReceiver<Command>,
    keep_alive: Duration,
    connect_timeout: Duration,
) {
    let emit = |kind: TransportEventKind| {
        // The manager may already be gone during shutdown
        let _ = events.send(ManagerEvent::Transport(TransportEvent {
            tag: tag.clone(),
            kind,
        }));
    };

    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            emit(TransportEventKind::Failed {
                error: e.to_string(),
            });
            return;
        }
        Err(_) => {
            emit(TransportEventKind::Failed {
                error: format!("connect timed out after {:?}", connect_timeout),
            });
            return;
        }
    };

    tracing::trace!(relay = %url, generation = tag.generation, "Websocket open");
    emit(TransportEventKind::Opened);

    let (mut sink, mut stream) = ws.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + keep_alive, keep_alive);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        emit(TransportEventKind::Failed { error: e.to_string() });
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    emit(TransportEventKind::Closed {
                        reason: "closed locally".to_string(),
                    });
                    return;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => emit(TransportEventKind::Message(text)),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    emit(TransportEventKind::Activity)
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string());
                    emit(TransportEventKind::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportEventKind::Failed { error: e.to_string() });
                    return;
                }
                None => {
                    emit(TransportEventKind::Closed {
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    emit(TransportEventKind::Failed { error: e.to_string() });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_keep_alive_keeps_timeout() {
        let factory = WsTransportFactory::new(Duration::from_secs(30), Duration::from_secs(3));
        let rebuilt = factory.with_keep_alive(Duration::from_secs(120));
        assert_eq!(rebuilt.keep_alive(), Duration::from_secs(120));
        assert_eq!(factory.keep_alive(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_failure() {
        let factory = WsTransportFactory::new(Duration::from_secs(30), Duration::from_secs(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tag = TransportTag {
            key: ConnectionKey::new("c", "ws://127.0.0.1:1"),
            generation: 7,
        };

        let _transport = factory.open("ws://127.0.0.1:1", tag.clone(), tx);

        match rx.recv().await {
            Some(ManagerEvent::Transport(event)) => {
                assert_eq!(event.tag, tag);
                assert!(matches!(event.kind, TransportEventKind::Failed { .. }));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
