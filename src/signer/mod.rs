//! Signer session: a NIP-46-style request/reply protocol layered over one
//! long-lived Connection subscription, used to delegate signing, encryption
//! and decryption to a remote agent over encrypted direct messages.
//!
//! Grounded on the same handle/background-task split as
//! [`crate::connection::Connection`] — the teacher's own pattern of a small
//! public struct with an `Arc<Mutex<_>>` of actual state, driven by a task
//! the constructor spawns.

pub mod token;

use std::collections::HashMap;
use std::sync::Arc;

use async_std::sync::Mutex;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::collaborators::{IdentityResolver, Signer, TransportCrypto};
use crate::connection::Connection;
use crate::error::RelayError;
use crate::event::UnsignedEvent;
use crate::filter::Filter;
use crate::ids::{random_id, PubKey, RequestId};
use crate::subscription::SubscriptionEvent;

/// Transport event kind for the remote-signing protocol.
pub const TRANSPORT_KIND: u32 = 24133;

/// Observable side effects of a [`SignerSession`].
#[derive(Debug, Clone)]
pub enum SignerEvent {
    /// The remote signer wants the user to approve something out of band
    /// before it will answer the in-flight request.
    AuthUrl(String),
}

type PendingReplies = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, RelayError>>>>>;

/// A client of a remote signing agent.
pub struct SignerSession {
    connection: Connection,
    crypto: Arc<dyn TransportCrypto>,
    local_signer: Arc<dyn Signer>,
    identity: Arc<dyn IdentityResolver>,
    remote_pubkey: Arc<Mutex<Option<PubKey>>>,
    /// Set if `decode_npub` failed during construction; checked and
    /// surfaced eagerly by [`Self::block_until_ready`] instead of being
    /// conflated with an identifier that hasn't resolved yet.
    remote_pubkey_error: Option<RelayError>,
    identifier: Option<String>,
    otp: Option<String>,
    pending: PendingReplies,
    events_tx: mpsc::UnboundedSender<SignerEvent>,
}

impl SignerSession {
    /// Parses `token` per the four forms `token::parse` recognizes. `crypto`
    /// is this session's own transport keypair (ephemeral key generation is
    /// a cryptographic primitive out of this crate's scope, so the host
    /// supplies it rather than this constructor minting one). `local_signer`
    /// signs the kind-24133 transport envelope itself, as distinct from the
    /// *remote* signer this session is a client of.
    ///
    /// A malformed `npub`/`npub#otp` token fails `decode_npub` immediately;
    /// that error is held and returned eagerly by [`Self::block_until_ready`]
    /// rather than discarded, so a decode failure is never confused with an
    /// identifier that simply hasn't resolved yet.
    pub fn new(
        token: &str,
        connection: Connection,
        crypto: Arc<dyn TransportCrypto>,
        local_signer: Arc<dyn Signer>,
        identity: Arc<dyn IdentityResolver>,
    ) -> (Self, mpsc::UnboundedReceiver<SignerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded();
        let (remote_pubkey, remote_pubkey_error, identifier, otp) = match token::parse(token) {
            token::Token::NpubWithOtp { npub, otp } => match identity.decode_npub(&npub) {
                Ok(pubkey) => (Some(pubkey), None, None, Some(otp)),
                Err(e) => (None, Some(e), None, Some(otp)),
            },
            token::Token::Npub(npub) => match identity.decode_npub(&npub) {
                Ok(pubkey) => (Some(pubkey), None, None, None),
                Err(e) => (None, Some(e), None, None),
            },
            token::Token::Identifier(identifier) => (None, None, Some(identifier), None),
            token::Token::RawHex(hex) => (Some(PubKey(hex)), None, None, None),
        };
        let session = SignerSession {
            connection,
            crypto,
            local_signer,
            identity,
            remote_pubkey: Arc::new(Mutex::new(remote_pubkey)),
            remote_pubkey_error,
            identifier,
            otp,
            pending: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
        };
        (session, events_rx)
    }

    /// Handshake: resolves the remote pubkey if needed, opens the long-lived
    /// subscription, waits the 100ms ordering guard, then sends the
    /// `connect` request and waits for `"ack"`.
    pub async fn block_until_ready(&self) -> Result<(), RelayError> {
        if let Some(e) = &self.remote_pubkey_error {
            return Err(RelayError::RemoteError(e.to_string()));
        }
        if self.remote_pubkey.lock().await.is_none() {
            let identifier = self.identifier.as_deref().ok_or(RelayError::RemoteUnknown)?;
            let resolved = self.identity.resolve_identifier(identifier).await?;
            *self.remote_pubkey.lock().await = Some(resolved);
        }

        let local_pubkey = self.crypto.pubkey();
        let filter = Filter::kinds(vec![TRANSPORT_KIND]).tag("p", vec![local_pubkey.0.clone()]);
        let subscription = self.connection.prepare_subscription(vec![filter]).await;
        self.connection.fire(&subscription).await?;
        self.spawn_reply_reader(subscription.into_receiver());

        // Ordering guard: the subscription must reach the relay before the
        // first request, or the reply can race our own readiness to
        // receive it.
        crate::util::sleep(std::time::Duration::from_millis(100)).await;

        let mut params = vec![Value::String(local_pubkey.0.clone())];
        if let Some(otp) = &self.otp {
            params.push(Value::String(otp.clone()));
        }
        let result = self.send_request("connect", params).await?;
        match result.as_str() {
            Some("ack") => Ok(()),
            other => Err(RelayError::HandshakeFailed(format!(
                "expected \"ack\", got {other:?}"
            ))),
        }
    }

    pub async fn encrypt(&self, recipient: &PubKey, plaintext: &str) -> Result<String, RelayError> {
        let params = vec![
            Value::String(recipient.0.clone()),
            Value::String(plaintext.to_string()),
        ];
        let result = self.send_request("nip04_encrypt", params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RelayError::RemoteError("nip04_encrypt result was not a string".into()))
    }

    /// The remote returns a JSON-encoded array whose first element is the
    /// plaintext. Preserved exactly as-is rather than flattened to a bare
    /// string, since changing the shape would break wire compatibility.
    pub async fn decrypt(&self, sender: &PubKey, ciphertext: &str) -> Result<String, RelayError> {
        let params = vec![
            Value::String(sender.0.clone()),
            Value::String(ciphertext.to_string()),
        ];
        let result = self.send_request("nip04_decrypt", params).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| RelayError::RemoteError("nip04_decrypt result was not a string".into()))?;
        let array: Vec<Value> = serde_json::from_str(encoded)?;
        array
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RelayError::RemoteError("nip04_decrypt array was empty".into()))
    }

    /// Returns the signature produced by the remote signer: the result is a
    /// JSON-encoded signed event whose `sig` field is returned.
    pub async fn sign_event(&self, event: &UnsignedEvent) -> Result<String, RelayError> {
        let params = vec![Value::String(serde_json::to_string(event)?)];
        let result = self.send_request("sign_event", params).await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| RelayError::RemoteError("sign_event result was not a string".into()))?;
        let signed: crate::event::Event = serde_json::from_str(encoded)?;
        Ok(signed.sig)
    }

    async fn send_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError> {
        let remote_pubkey = self
            .remote_pubkey
            .lock()
            .await
            .clone()
            .ok_or(RelayError::RemoteUnknown)?;

        let request_id = RequestId(random_id());
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        let payload = json!({ "id": request_id.0, "method": method, "params": params }).to_string();
        let ciphertext = self.crypto.encrypt(&remote_pubkey, &payload)?;
        let unsigned = UnsignedEvent::new(
            self.crypto.pubkey(),
            TRANSPORT_KIND,
            vec![vec!["p".into(), remote_pubkey.0.clone()]],
            ciphertext,
        );
        let signed = self.local_signer.sign_event(unsigned)?;
        self.connection.publish(signed).await?;

        rx.await.map_err(|_| RelayError::ConnectionClosed)?
    }

    fn spawn_reply_reader(&self, mut events: mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let crypto = self.crypto.clone();
        let pending = self.pending.clone();
        let events_tx = self.events_tx.clone();
        async_std::task::spawn(async move {
            while let Some(message) = events.next().await {
                match message {
                    SubscriptionEvent::Event(event) => {
                        handle_reply(&crypto, &pending, &events_tx, event).await;
                    },
                    SubscriptionEvent::Closed(_) => {
                        let mut pending = pending.lock().await;
                        for (_, resolver) in pending.drain() {
                            let _ = resolver.send(Err(RelayError::ConnectionClosed));
                        }
                        break;
                    },
                    SubscriptionEvent::Eose => {},
                }
            }
        });
    }
}

async fn handle_reply(
    crypto: &Arc<dyn TransportCrypto>,
    pending: &PendingReplies,
    events_tx: &mpsc::UnboundedSender<SignerEvent>,
    event: crate::event::Event,
) {
    let plaintext = match crypto.decrypt(&event.pubkey, &event.content) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decrypt signer reply");
            return;
        },
    };
    let reply: Value = match serde_json::from_str(&plaintext) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "signer reply was not valid json");
            return;
        },
    };
    let Some(id) = reply.get("id").and_then(Value::as_str).map(|s| RequestId(s.to_string())) else {
        tracing::warn!("signer reply missing id");
        return;
    };

    // NIP-46's auth-url flow: the remote asks the user to approve out of
    // band and keeps the original request outstanding.
    if reply.get("result").and_then(Value::as_str) == Some("auth_url") {
        if let Some(url) = reply.get("error").and_then(Value::as_str) {
            let _ = events_tx.unbounded_send(SignerEvent::AuthUrl(url.to_string()));
        }
        return;
    }

    let mut pending = pending.lock().await;
    let Some(resolver) = pending.remove(&id) else {
        tracing::warn!(request_id = %id, "signer reply for unknown request id");
        return;
    };
    drop(pending);

    let error = reply.get("error").and_then(Value::as_str);
    let outcome = match error {
        Some(message) if !message.is_empty() => Err(RelayError::RemoteError(message.to_string())),
        _ => Ok(reply.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = resolver.send(outcome);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::EventId;

    /// Plaintext-only stand-in: prepends/strips nothing, so test fixtures can
    /// write the JSON envelope directly into `event.content`.
    struct PassthroughCrypto {
        pubkey: PubKey,
    }

    impl TransportCrypto for PassthroughCrypto {
        fn pubkey(&self) -> PubKey {
            self.pubkey.clone()
        }

        fn encrypt(&self, _recipient: &PubKey, plaintext: &str) -> Result<String, RelayError> {
            Ok(plaintext.to_string())
        }

        fn decrypt(&self, _sender: &PubKey, ciphertext: &str) -> Result<String, RelayError> {
            Ok(ciphertext.to_string())
        }
    }

    fn reply_event(content: &str) -> crate::event::Event {
        crate::event::Event {
            id: EventId("reply1".into()),
            pubkey: PubKey("remote".into()),
            created_at: 1,
            kind: TRANSPORT_KIND,
            tags: vec![],
            content: content.to_string(),
            sig: String::new(),
        }
    }

    fn fixture() -> (
        Arc<dyn TransportCrypto>,
        PendingReplies,
        mpsc::UnboundedSender<SignerEvent>,
        mpsc::UnboundedReceiver<SignerEvent>,
    ) {
        let crypto: Arc<dyn TransportCrypto> = Arc::new(PassthroughCrypto {
            pubkey: PubKey("local".into()),
        });
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded();
        (crypto, pending, events_tx, events_rx)
    }

    #[async_std::test]
    async fn resolves_pending_request_by_id() {
        let (crypto, pending, events_tx, _events_rx) = fixture();
        let id = RequestId("r1".into());
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id.clone(), tx);

        let content = json!({"id": "r1", "result": "ack"}).to_string();
        handle_reply(&crypto, &pending, &events_tx, reply_event(&content)).await;

        assert_eq!(rx.await.unwrap().unwrap(), json!("ack"));
        assert!(pending.lock().await.is_empty());
    }

    #[async_std::test]
    async fn error_field_rejects_the_pending_request() {
        let (crypto, pending, events_tx, _events_rx) = fixture();
        let id = RequestId("r2".into());
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id.clone(), tx);

        let content = json!({"id": "r2", "error": "denied"}).to_string();
        handle_reply(&crypto, &pending, &events_tx, reply_event(&content)).await;

        match rx.await.unwrap() {
            Err(RelayError::RemoteError(message)) => assert_eq!(message, "denied"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[async_std::test]
    async fn unknown_request_id_is_dropped_without_panicking() {
        let (crypto, pending, events_tx, _events_rx) = fixture();
        let content = json!({"id": "nobody-is-waiting", "result": "ack"}).to_string();
        handle_reply(&crypto, &pending, &events_tx, reply_event(&content)).await;
        assert!(pending.lock().await.is_empty());
    }

    #[async_std::test]
    async fn auth_url_surfaces_as_an_event_and_leaves_the_request_pending() {
        let (crypto, pending, events_tx, mut events_rx) = fixture();
        let id = RequestId("r3".into());
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id.clone(), tx);

        let content = json!({
            "id": "r3",
            "result": "auth_url",
            "error": "https://example.com/approve",
        })
        .to_string();
        handle_reply(&crypto, &pending, &events_tx, reply_event(&content)).await;

        match events_rx.next().await {
            Some(SignerEvent::AuthUrl(url)) => assert_eq!(url, "https://example.com/approve"),
            other => panic!("unexpected: {other:?}"),
        }
        // The original request keeps waiting for a subsequent actual
        // response — it must not have been resolved yet.
        assert!(pending.lock().await.contains_key(&id));
        drop(rx);
    }
}
