//! Newtype identifiers used throughout the crate.
//!
//! Grounded on the teacher's own newtype style for `AppID`/`Mailbox`/`Phase`
//! in `core.rs`: thin wrappers with `Display`/`Deref`/`From` derived rather
//! than hand, so callers can still treat them mostly like strings.

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

/// Identifier of a signed event, as a lowercase hex string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, Deref, From, Serialize, Deserialize,
)]
pub struct EventId(pub String);

/// A relay- or client-minted correlation id for a subscription, count query,
/// or auth response (the `sub-id` / `req-id` slot in REQ/CLOSE/COUNT framing).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, Deref, From, Serialize, Deserialize,
)]
pub struct CorrelationId(pub String);

/// A hex-encoded 32-byte public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
pub struct PubKey(pub String);

impl PubKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PubKey(hex::encode(bytes))
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], hex::FromHexError> {
        let decoded = hex::decode(&self.0)?;
        decoded
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)
    }
}

/// Id of an in-flight signer request, minted fresh per request.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, Deref, From, Serialize, Deserialize,
)]
pub struct RequestId(pub String);

/// Mint a fresh, session-unique random hex id.
pub fn random_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
