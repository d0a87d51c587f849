//! Relay URL normalization.
//!
//! Configurations are hand-edited, so the same relay shows up as
//! `wss://Relay.Example.com/` in one place and `wss://relay.example.com` in
//! another. Both must map to one connection and one ledger key.
//!
//! # Normalization Rules
//!
//! - Trim surrounding whitespace
//! - Require a websocket scheme (`wss://` or `ws://`)
//! - Lowercase the scheme and host
//! - Preserve port numbers and paths
//! - Remove trailing slashes

use nostr::RelayUrl;

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    /// URL is valid and normalized.
    Ok(String),
    /// URL is not a usable relay URL.
    Invalid(String),
}

impl NormalizeResult {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            Self::Invalid(_) => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a relay URL.
///
/// ```ignore
/// use pubsub_engine::relay::url::normalize_relay_url;
///
/// assert_eq!(
///     normalize_relay_url("wss://Relay.Example.COM/").ok(),
///     Some("wss://relay.example.com".to_string())
/// );
/// ```
pub fn normalize_relay_url(url: &str) -> NormalizeResult {
    let url = url.trim();

    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("wss://") && !lower.starts_with("ws://") {
        return NormalizeResult::Invalid("URL must start with wss:// or ws://".to_string());
    }

    let parsed = match RelayUrl::parse(url) {
        Ok(u) => u,
        Err(e) => return NormalizeResult::Invalid(format!("Invalid relay URL: {}", e)),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    if host_of(&normalized).is_empty() {
        return NormalizeResult::Invalid("URL has no host".to_string());
    }

    NormalizeResult::Ok(normalized)
}

/// Normalize a list of URLs, dropping invalid entries and duplicates.
///
/// Order of first appearance is kept.
pub fn normalize_all<'a, I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut out: Vec<String> = Vec::new();
    for raw in urls {
        match normalize_relay_url(raw) {
            NormalizeResult::Ok(url) => {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
            NormalizeResult::Invalid(reason) => {
                tracing::warn!(relay = %raw, "Skipping relay URL: {}", reason);
            }
        }
    }
    out
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(
            normalize_relay_url("wss://relay.example.com/").ok(),
            Some("wss://relay.example.com".to_string())
        );
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(
            normalize_relay_url("  wss://Relay.Example.COM  ").ok(),
            Some("wss://relay.example.com".to_string())
        );
    }

    #[test]
    fn test_port_and_path_preserved() {
        assert_eq!(
            normalize_relay_url("ws://relay.example.com:7777/inbox/").ok(),
            Some("ws://relay.example.com:7777/inbox".to_string())
        );
    }

    #[test]
    fn test_non_websocket_rejected() {
        assert!(!normalize_relay_url("https://relay.example.com").is_ok());
        assert!(!normalize_relay_url("relay.example.com").is_ok());
        assert!(!normalize_relay_url("").is_ok());
    }

    #[test]
    fn test_normalize_all_dedupes() {
        let urls = vec![
            "wss://a.example.com/".to_string(),
            "https://bad.example.com".to_string(),
            "wss://A.example.com".to_string(),
            "wss://b.example.com".to_string(),
        ];
        assert_eq!(
            normalize_all(&urls),
            vec![
                "wss://a.example.com".to_string(),
                "wss://b.example.com".to_string()
            ]
        );
    }
}
