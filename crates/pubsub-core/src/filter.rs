//! Helpers around `nostr::Filter`.
//!
//! Filters are treated as immutable values; the only derived form is a copy
//! with `since` overridden for a specific relay.

use nostr::{Filter, Timestamp};

/// Returns true if at least one constraint (ids, authors, kinds, tag
/// references, since, until, limit, search) is set.
pub fn is_subscribable(filter: &Filter) -> bool {
    *filter != Filter::new()
}

/// Copy `base` with `since` replaced.
pub fn with_since(base: &Filter, since: u64) -> Filter {
    let mut filter = base.clone();
    filter.since = Some(Timestamp::from_secs(since));
    filter
}

/// The `since` bound in seconds, if set.
pub fn since_secs(filter: &Filter) -> Option<u64> {
    filter.since.map(|ts| ts.as_secs())
}
