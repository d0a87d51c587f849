//! Event model and structural validation.
//!
//! Events arrive as the third element of an `EVENT` frame. Validation here is
//! structural only (per NIP-01 field shapes): required fields present, hex
//! ids/pubkeys of 64 characters and signatures of 128 characters. Signature
//! verification is left to the destination.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Length of a hex-encoded event id or public key.
pub const HEX_ID_LEN: usize = 64;

/// Length of a hex-encoded Schnorr signature.
pub const HEX_SIG_LEN: usize = 128;

/// A Nostr event as received from a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl RelayEvent {
    /// Decode an event from the JSON value carried by an `EVENT` frame and
    /// check its structure.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or has the wrong type,
    /// or if the id, pubkey or signature has the wrong shape.
    pub fn from_value(value: &Value) -> Result<Self> {
        let event: RelayEvent = serde_json::from_value(value.clone())?;
        event.validate_structure()?;
        Ok(event)
    }

    /// Check field shapes without touching cryptography.
    pub fn validate_structure(&self) -> Result<()> {
        check_hex("id", &self.id, HEX_ID_LEN)?;
        check_hex("pubkey", &self.pubkey, HEX_ID_LEN)?;
        check_hex("sig", &self.sig, HEX_SIG_LEN)?;
        Ok(())
    }

    /// Serialize back to canonical wire JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn check_hex(field: &'static str, value: &str, expected_len: usize) -> Result<()> {
    if value.len() != expected_len {
        return Err(Error::InvalidField {
            field,
            reason: format!("expected {} hex characters, got {}", expected_len, value.len()),
        });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidField {
            field,
            reason: "contains non-hex characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_event_value(id_byte: char, created_at: u64) -> Value {
        json!({
            "id": id_byte.to_string().repeat(64),
            "pubkey": "b".repeat(64),
            "created_at": created_at,
            "kind": 1,
            "tags": [["t", "nostr"]],
            "content": "hello relay",
            "sig": "c".repeat(128),
        })
    }

    #[test]
    fn test_from_value_valid() {
        let event = RelayEvent::from_value(&sample_event_value('a', 1_700_000_000)).unwrap();
        assert_eq!(event.created_at, 1_700_000_000);
        assert_eq!(event.kind, 1);
        assert_eq!(event.tags, vec![vec!["t".to_string(), "nostr".to_string()]]);
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut value = sample_event_value('a', 1);
        value.as_object_mut().unwrap().remove("sig");
        let err = RelayEvent::from_value(&value).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_short_id_rejected() {
        let mut value = sample_event_value('a', 1);
        value["id"] = json!("abc");
        let err = RelayEvent::from_value(&value).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "id", .. }));
    }

    #[test]
    fn test_non_hex_sig_rejected() {
        let mut value = sample_event_value('a', 1);
        value["sig"] = json!("z".repeat(128));
        let err = RelayEvent::from_value(&value).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "sig", .. }));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut value = sample_event_value('a', 1);
        value["created_at"] = json!("yesterday");
        assert!(RelayEvent::from_value(&value).is_err());
    }

    #[test]
    fn test_to_json_contains_fields() {
        let event = RelayEvent::from_value(&sample_event_value('d', 42)).unwrap();
        let json = event.to_json().unwrap();
        assert!(json.contains("\"created_at\":42"));
        assert!(json.contains("hello relay"));
    }
}
