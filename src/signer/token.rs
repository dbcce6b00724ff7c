//! Parses the four token shapes a [`super::SignerSession`] can be
//! constructed from.

/// The parsed form of a signer-session token string. Bech32 decoding itself
/// is out of scope here; this module only recognizes the shape and
/// hands the raw npub off to an [`crate::collaborators::IdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `"<npub>#<otp>"` — an npub plus a one-time password for the initial
    /// `connect` handshake.
    NpubWithOtp { npub: String, otp: String },
    /// A bare `npub1...` string.
    Npub(String),
    /// A human-readable (NIP-05-style) identifier, resolved lazily during
    /// the handshake.
    Identifier(String),
    /// A raw 32-byte hex pubkey.
    RawHex(String),
}

pub fn parse(token: &str) -> Token {
    if let Some((npub, otp)) = token.split_once('#') {
        return Token::NpubWithOtp {
            npub: npub.to_string(),
            otp: otp.to_string(),
        };
    }
    if token.starts_with("npub") {
        return Token::Npub(token.to_string());
    }
    if token.contains('.') {
        return Token::Identifier(token.to_string());
    }
    Token::RawHex(token.to_string())
}
