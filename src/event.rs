//! The signed-event and tag types this crate moves around.
//!
//! Event construction and signature validation are out of scope here:
//! callers hand us already-signed `Event`s to publish, and whatever we
//! receive from a relay we hand back unvalidated. These types exist only so
//! the rest of the crate (frame codec, subscription handle, signer session)
//! has something concrete to serialize, match filters against, and pass to
//! the `Signer`/`TransportCrypto` collaborators.

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, PubKey};

/// A single `["name", value, ...]` tag entry.
pub type Tag = Vec<String>;

/// An event before it has been signed (and usually before it has an id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: PubKey,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(pubkey: PubKey, kind: u32, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        UnsignedEvent {
            pubkey,
            kind,
            tags,
            content: content.into(),
            created_at: 0,
        }
    }

    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// A fully signed event, per the ecosystem's canonical schema: id, pubkey,
/// created_at, kind, tags, content, sig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PubKey,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Find the value of the first tag named `name`, e.g. `"p"` or `"relay"`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod test {
    use test_log::test;
    use super::*;

    fn sample() -> Event {
        Event {
            id: EventId("deadbeef".into()),
            pubkey: PubKey("abc123".into()),
            created_at: 100,
            kind: 24133,
            tags: vec![vec!["p".into(), "remote-pubkey".into()]],
            content: "ciphertext".into(),
            sig: "sig".into(),
        }
    }

    #[test]
    fn tag_value_finds_first_match() {
        let event = sample();
        assert_eq!(event.tag_value("p"), Some("remote-pubkey"));
        assert_eq!(event.tag_value("e"), None);
    }
}
