//! Crate-wide error taxonomy.
//!
//! One `thiserror` enum per the teacher's `WormholeError` shape in
//! `core.rs`: a flat, `#[non_exhaustive]` set of variants, `#[from]`
//! wrapping for the serialization/transport errors that cross our boundary
//! unchanged, and a few crate-specific kinds for the things that can only go
//! wrong in *this* protocol.

use thiserror::Error;

/// Errors surfaced by the relay connectivity core and the signer session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    /// A frame failed to parse. The connection stays alive; the caller of
    /// `Connection::dispatch` sees this only so it can log it — it is never
    /// propagated as a fatal error.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// `send` was attempted while the connection was not `Connected`.
    #[error("not connected")]
    NotConnected,

    /// A pending resolver was rejected because the socket ended while the
    /// request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The signer session's `connect` handshake did not yield `"ack"`.
    #[error("signer handshake failed: {0}")]
    HandshakeFailed(String),

    /// A human-readable identifier did not resolve before `block_until_ready`
    /// completed.
    #[error("remote signer identity did not resolve")]
    RemoteUnknown,

    /// The auth policy asked for default signing but no signer was
    /// configured on the connection.
    #[error("no signer configured for auth challenge")]
    NoSigner,

    /// The remote signer's response carried an `error` field; the message is
    /// surfaced verbatim.
    #[error("remote signer error: {0}")]
    RemoteError(String),

    /// The websocket transport closed or errored out from under us.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// JSON (de)serialization failed outside of frame parsing proper (e.g.
    /// encoding an outbound event).
    #[error("serialization error")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),

    /// The relay URL failed to parse.
    #[error("invalid relay url")]
    InvalidUrl(
        #[from]
        #[source]
        url::ParseError,
    ),
}

pub type Result<T> = std::result::Result<T, RelayError>;
