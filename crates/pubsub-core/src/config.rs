//! Subscription configuration model.
//!
//! A configuration names a set of relays, the filter to subscribe with, the
//! destination matching events are forwarded to, and an optional keyword list.
//! The engine only ever reads configurations.

use nostr::Filter;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::is_subscribable;

/// One subscription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Stable configuration id.
    pub id: String,

    /// Disabled configurations are never connected and never dispatched.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Relay URLs to subscribe on.
    pub relay_urls: Vec<String>,

    /// NIP-01 filter sent with the subscribe request.
    pub filter: Filter,

    /// Destination URI matching events are delivered to.
    pub destination: String,

    /// Subscription id used on the wire.
    pub subscription_id: String,

    /// Optional whole-word keywords; absent or empty matches everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_filter: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

impl Configuration {
    /// Check the fields the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidConfiguration {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.subscription_id.trim().is_empty() {
            return Err(invalid("empty subscription id"));
        }
        if self.relay_urls.is_empty() {
            return Err(invalid("no relay URLs"));
        }
        if !is_subscribable(&self.filter) {
            return Err(invalid("filter has no constraints set"));
        }
        Ok(())
    }

    /// Keywords with blanks removed, or `None` if there is nothing to match.
    pub fn keywords(&self) -> Option<Vec<&str>> {
        let keywords: Vec<&str> = self
            .keyword_filter
            .as_ref()?
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            None
        } else {
            Some(keywords)
        }
    }
}

/// On-disk list of configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationFile {
    pub configurations: Vec<Configuration>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nostr::Kind;

    pub(crate) fn sample_configuration(id: &str) -> Configuration {
        Configuration {
            id: id.to_string(),
            enabled: true,
            relay_urls: vec!["wss://relay.example.com".to_string()],
            filter: Filter::new().kind(Kind::TextNote),
            destination: "https://example.com/hook".to_string(),
            subscription_id: format!("sub-{}", id),
            keyword_filter: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_configuration("a").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_filter() {
        let mut config = sample_configuration("a");
        config.filter = Filter::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_relays() {
        let mut config = sample_configuration("a");
        config.relay_urls.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no relay URLs"));
    }

    #[test]
    fn test_keywords_trimmed() {
        let mut config = sample_configuration("a");
        assert!(config.keywords().is_none());

        config.keyword_filter = Some(vec!["  ".to_string()]);
        assert!(config.keywords().is_none());

        config.keyword_filter = Some(vec![" bitcoin ".to_string(), "".to_string()]);
        assert_eq!(config.keywords(), Some(vec!["bitcoin"]));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r##"{
            "configurations": [{
                "id": "alerts",
                "relayUrls": ["wss://relay.damus.io"],
                "filter": {"kinds": [1], "#t": ["nostr"]},
                "destination": "https://example.com/in",
                "subscriptionId": "alerts-sub",
                "keywordFilter": ["rust"]
            }]
        }"##;
        let file: ConfigurationFile = serde_json::from_str(json).unwrap();
        let config = &file.configurations[0];
        assert!(config.enabled);
        assert_eq!(config.subscription_id, "alerts-sub");
        assert_eq!(config.keywords(), Some(vec!["rust"]));
        assert!(config.validate().is_ok());
    }
}
