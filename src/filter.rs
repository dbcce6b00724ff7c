//! Subscription filters and the pure `matches` predicate.
//!
//! This module supplies the minimal conjunctive implementation the
//! subscription handle needs to be independently testable, without
//! attempting full NIP-01 prefix/tag-generality semantics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::event::Event;

/// A single filter: every populated field is a conjunctive predicate: a
/// matching event must satisfy all of them — a conjunctive match per
/// NIP-01 REQ filter semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Tag filters, e.g. `"#p" -> [pubkey, ...]`.
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn kinds(kinds: Vec<u32>) -> Self {
        Filter {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub fn tag(mut self, name: &str, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{name}"), values);
        self
    }
}

/// Does `event` satisfy every predicate present in `filter`?
pub fn matches(filter: &Filter, event: &Event) -> bool {
    if let Some(ids) = &filter.ids {
        if !ids.iter().any(|id| id == event.id.as_ref()) {
            return false;
        }
    }
    if let Some(authors) = &filter.authors {
        if !authors.iter().any(|a| a == event.pubkey.as_ref()) {
            return false;
        }
    }
    if let Some(kinds) = &filter.kinds {
        if !kinds.contains(&event.kind) {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if event.created_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if event.created_at > until {
            return false;
        }
    }
    for (tag_key, wanted) in &filter.tags {
        let Some(name) = tag_key.strip_prefix('#') else {
            continue;
        };
        let has_match = event
            .tags
            .iter()
            .any(|tag| tag.first().map(String::as_str) == Some(name) && {
                tag.get(1).is_some_and(|v| wanted.contains(v))
            });
        if !has_match {
            return false;
        }
    }
    true
}

/// Does `event` satisfy *any* of a subscription's filters? A subscription
/// with several filters is a disjunction of them (standard relay semantics);
/// each individual filter is itself the conjunction implemented above.
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| matches(filter, event))
}

impl AsRef<str> for crate::ids::EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for crate::ids::PubKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
