//! Destination URI construction.
//!
//! A delivered event is referenced as
//! `<destination>?id=<event id>&event=<base64url(event json)>`. The inline
//! payload lets the receiver render without a relay round-trip; it is left
//! out when the encoded form would exceed [`MAX_INLINE_EVENT_BYTES`].

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use pubsub_core::RelayEvent;

/// Largest encoded event carried inline in the URI.
pub const MAX_INLINE_EVENT_BYTES: usize = 500 * 1024;

/// Build the URI handed to the dispatcher for `event`.
pub fn destination_uri(destination: &str, event: &RelayEvent) -> String {
    let separator = if destination.contains('?') { '&' } else { '?' };
    let mut uri = format!("{}{}id={}", destination, separator, event.id);

    match event.to_json() {
        Ok(json) => {
            let encoded = URL_SAFE_NO_PAD.encode(json.as_bytes());
            if encoded.len() <= MAX_INLINE_EVENT_BYTES {
                uri.push_str("&event=");
                uri.push_str(&encoded);
            } else {
                tracing::debug!(
                    event = %event.id,
                    bytes = encoded.len(),
                    "Event too large to inline in destination URI"
                );
            }
        }
        Err(e) => {
            tracing::warn!(event = %event.id, "Failed to encode event for destination: {}", e);
        }
    }

    uri
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: String) -> RelayEvent {
        RelayEvent {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![],
            content,
            sig: "c".repeat(128),
        }
    }

    #[test]
    fn test_uri_carries_id_and_payload() {
        let ev = event("hello".to_string());
        let uri = destination_uri("https://example.com/in", &ev);

        let expected_prefix = format!("https://example.com/in?id={}&event=", ev.id);
        assert!(uri.starts_with(&expected_prefix), "{}", uri);

        let encoded = &uri[expected_prefix.len()..];
        let decoded = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        let round: RelayEvent = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(round, ev);
    }

    #[test]
    fn test_existing_query_kept() {
        let uri = destination_uri("https://example.com/in?src=x", &event(String::new()));
        assert!(uri.starts_with("https://example.com/in?src=x&id="));
    }

    #[test]
    fn test_large_event_omits_payload() {
        let ev = event("x".repeat(MAX_INLINE_EVENT_BYTES));
        let uri = destination_uri("https://example.com/in", &ev);
        assert_eq!(uri, format!("https://example.com/in?id={}", ev.id));
    }
}
