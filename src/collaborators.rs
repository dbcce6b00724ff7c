//! External collaborator traits.
//!
//! Event construction/validation, key-derivation and low-level
//! encryption primitives, and bech32 identity encoding all live outside
//! this crate, referenced only through their interfaces. Rather than fabricate
//! a cryptography stack this crate doesn't need to own, each is modeled as a
//! small trait the host injects — mirroring how the teacher treats its own
//! boundary (PAKE math lives in `spake2`, authenticated encryption in
//! `crypto_secretbox`, neither hand-rolled in `core.rs`).

use std::future::Future;
use std::pin::Pin;

use crate::error::RelayError;
use crate::event::{Event, UnsignedEvent};
use crate::ids::PubKey;

/// A future boxed for object-safety, as the teacher boxes its websocket sink
/// (`Pin<Box<dyn Sink<...>>>` in `core/io.rs`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Signs events with a key the host holds directly (used by the auth
/// coordinator for relay `AUTH` challenges). This is a
/// different signer than the one driven indirectly through a
/// [`crate::signer::SignerSession`]: that session *is* a remote-signing
/// client; this trait is for local, in-process signing.
pub trait Signer: Send + Sync {
    fn pubkey(&self) -> PubKey;
    fn sign_event(&self, event: UnsignedEvent) -> Result<Event, RelayError>;
}

/// Low-level encryption primitives for the NIP-46-style transport channel,
/// symmetrically encrypted per the ecosystem's standard scheme.
/// A [`crate::signer::SignerSession`] owns one of these for its local
/// ephemeral (or host-supplied) keypair.
pub trait TransportCrypto: Send + Sync {
    fn pubkey(&self) -> PubKey;
    fn encrypt(&self, recipient: &PubKey, plaintext: &str) -> Result<String, RelayError>;
    fn decrypt(&self, sender: &PubKey, ciphertext: &str) -> Result<String, RelayError>;
}

/// Validates a signed event before it is handed to the wire. Event
/// construction and validation live outside this crate; this trait is
/// the seam a host plugs its own validator into, e.g. to check `id`/`sig`
/// against `pubkey` before a publish is ever attempted). Optional: a
/// [`crate::connection::Connection`] with none configured publishes events
/// as-is, trusting the caller.
pub trait EventValidator: Send + Sync {
    fn validate(&self, event: &Event) -> Result<(), RelayError>;
}

/// Resolves identity formats this crate does not decode itself: bech32
/// `npub` decoding and human-readable (NIP-05-style) identifier lookup.
pub trait IdentityResolver: Send + Sync {
    /// Decode a bech32 `npub1...` string to its 32-byte hex pubkey.
    fn decode_npub(&self, npub: &str) -> Result<PubKey, RelayError>;

    /// Resolve a human-readable identifier (e.g. `"name@example.com"`) to a
    /// pubkey. Async because this is a network lookup in any real
    /// implementation.
    fn resolve_identifier<'a>(&'a self, identifier: &'a str) -> BoxFuture<'a, Result<PubKey, RelayError>>;
}
