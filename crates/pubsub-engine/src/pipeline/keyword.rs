//! Whole-word, case-insensitive keyword matching.
//!
//! A keyword matches when it is bounded by the start or end of the content
//! or by a non-word character, so keywords such as `#nostr` or `c++` work.

use regex::Regex;

/// Content beyond this many characters is not searched.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Compiled keyword list. Any single keyword matching is enough.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
    pattern: Option<Regex>,
}

impl KeywordMatcher {
    /// Build a matcher. An empty list matches everything.
    pub fn new(keywords: &[&str]) -> Self {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();

        if keywords.is_empty() {
            return Self {
                keywords,
                pattern: None,
            };
        }

        let alternatives: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
        let source = format!(r"(?i)(?:^|\W)(?:{})(?:$|\W)", alternatives.join("|"));
        let pattern = match Regex::new(&source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                // Escaped literals only; reachable solely via the size limit
                tracing::warn!("Keyword pattern rejected, matching everything: {}", e);
                None
            }
        };
        Self { keywords, pattern }
    }

    /// The trimmed, non-empty keywords this matcher was built from.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns true if `content` (first [`MAX_CONTENT_CHARS`] characters)
    /// contains any keyword as a whole word.
    pub fn matches(&self, content: &str) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };
        pattern.is_match(truncate_chars(content, MAX_CONTENT_CHARS))
    }
}

/// Prefix of `s` holding at most `max` characters, cut on a char boundary.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Keyword check for an optional keyword list.
pub fn keyword_match(keywords: Option<&[&str]>, content: &str) -> bool {
    match keywords {
        None => true,
        Some(list) => KeywordMatcher::new(list).matches(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_or_empty_matches_all() {
        assert!(keyword_match(None, "anything"));
        assert!(KeywordMatcher::new(&[]).matches("anything"));
        assert!(KeywordMatcher::new(&["  "]).matches(""));
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let m = KeywordMatcher::new(&["rust"]);
        assert!(m.matches("I love Rust!"));
        assert!(m.matches("RUST"));
        assert!(!m.matches("trustworthy"));
        assert!(!m.matches("rusty"));
    }

    #[test]
    fn test_any_keyword_suffices() {
        let m = KeywordMatcher::new(&["bitcoin", "nostr"]);
        assert!(m.matches("hello nostr"));
        assert!(!m.matches("hello world"));
    }

    #[test]
    fn test_keywords_with_symbols() {
        let m = KeywordMatcher::new(&["#nostr", "c++"]);
        assert!(m.matches("#nostr is live"));
        assert!(m.matches("posted to #NOSTR"));
        assert!(m.matches("learning c++, slowly"));
        assert!(!m.matches("#nostrich"));
        assert!(!m.matches("abc++d"));
    }

    #[test]
    fn test_keywords_trimmed() {
        let m = KeywordMatcher::new(&[" rust ", ""]);
        assert_eq!(m.keywords(), ["rust".to_string()]);
    }

    #[test]
    fn test_regex_metacharacters_escaped() {
        let m = KeywordMatcher::new(&["c.d"]);
        assert!(m.matches("see c.d here"));
        assert!(!m.matches("see cxd here"));
    }

    #[test]
    fn test_content_capped() {
        let m = KeywordMatcher::new(&["needle"]);
        let mut content = "x ".repeat(MAX_CONTENT_CHARS / 2);
        content.push_str(" needle");
        assert!(!m.matches(&content));

        let early = format!("needle {}", "x".repeat(MAX_CONTENT_CHARS * 2));
        assert!(m.matches(&early));
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
