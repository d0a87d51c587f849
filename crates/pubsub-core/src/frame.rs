//! NIP-01 wire frames.
//!
//! Client → relay frames are encoded with [`encode_req`] and [`encode_close`].
//! Relay → client frames are decoded with [`RelayFrame::parse`].
//!
//! ```text
//! ["REQ", <sub_id>, <filter>]          client → relay
//! ["CLOSE", <sub_id>]                  client → relay
//! ["EVENT", <sub_id>, <event>]         relay → client
//! ["EOSE", <sub_id>]                   relay → client
//! ["NOTICE", <message>]                relay → client
//! ["OK", <event_id>, <bool>, <msg>]    relay → client
//! ["CLOSED", <sub_id>, <msg>]          relay → client
//! ```
//!
//! Decoding fails closed: invalid JSON, a non-array payload, or a known label
//! with the wrong shape is an error. An array whose label we do not handle
//! decodes to [`RelayFrame::Unknown`].

use std::fmt;

use nostr::Filter;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::filter::is_subscribable;

/// Frame kinds, used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Event,
    Eose,
    Notice,
    Ok,
    Closed,
    Unknown,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Eose => "EOSE",
            Self::Notice => "NOTICE",
            Self::Ok => "OK",
            Self::Closed => "CLOSED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded relay → client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// An event for one of our subscriptions. The event body is kept raw so
    /// that subscription checks can run before event validation.
    Event {
        subscription_id: String,
        event: Value,
    },
    /// End of stored events for a subscription.
    Eose { subscription_id: String },
    /// Human-readable relay notice.
    Notice { message: String },
    /// Publish acknowledgement.
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// Relay-initiated subscription close.
    Closed {
        subscription_id: String,
        message: String,
    },
    /// Array frame with a label we don't handle (AUTH, COUNT, ...).
    Unknown { label: Option<String> },
}

impl RelayFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let items = value
            .as_array()
            .ok_or_else(|| Error::MalformedFrame("expected a JSON array".to_string()))?;

        let label = match items.first() {
            Some(Value::String(label)) => label.as_str(),
            Some(_) => return Ok(Self::Unknown { label: None }),
            None => return Err(Error::MalformedFrame("empty array".to_string())),
        };

        match label {
            "EVENT" => {
                let subscription_id = string_at(items, 1, label)?;
                let event = items
                    .get(2)
                    .filter(|v| v.is_object())
                    .cloned()
                    .ok_or_else(|| {
                        Error::MalformedFrame("EVENT frame without event object".to_string())
                    })?;
                Ok(Self::Event {
                    subscription_id,
                    event,
                })
            }
            "EOSE" => Ok(Self::Eose {
                subscription_id: string_at(items, 1, label)?,
            }),
            "NOTICE" => Ok(Self::Notice {
                message: string_at(items, 1, label)?,
            }),
            "OK" => {
                let event_id = string_at(items, 1, label)?;
                let accepted = items.get(2).and_then(Value::as_bool).ok_or_else(|| {
                    Error::MalformedFrame("OK frame without accepted flag".to_string())
                })?;
                let message = optional_string_at(items, 3);
                Ok(Self::Ok {
                    event_id,
                    accepted,
                    message,
                })
            }
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(items, 1, label)?,
                message: optional_string_at(items, 2),
            }),
            other => Ok(Self::Unknown {
                label: Some(other.to_string()),
            }),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Event { .. } => FrameKind::Event,
            Self::Eose { .. } => FrameKind::Eose,
            Self::Notice { .. } => FrameKind::Notice,
            Self::Ok { .. } => FrameKind::Ok,
            Self::Closed { .. } => FrameKind::Closed,
            Self::Unknown { .. } => FrameKind::Unknown,
        }
    }
}

fn string_at(items: &[Value], index: usize, label: &str) -> Result<String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::MalformedFrame(format!("{} frame missing string at position {}", label, index))
        })
}

fn optional_string_at(items: &[Value], index: usize) -> String {
    items
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Encode a subscribe request.
///
/// # Errors
///
/// Returns [`Error::EmptyFilter`] if the filter has no constraints set, since
/// relays would stream everything they have.
pub fn encode_req(subscription_id: &str, filter: &Filter) -> Result<String> {
    if !is_subscribable(filter) {
        return Err(Error::EmptyFilter);
    }
    Ok(serde_json::to_string(&json!(["REQ", subscription_id, filter]))?)
}

/// Encode an unsubscribe request.
pub fn encode_close(subscription_id: &str) -> String {
    json!(["CLOSE", subscription_id]).to_string()
}
