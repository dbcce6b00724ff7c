//! Auth coordinator: turns an `AUTH` challenge into a decision the
//! connection FSM can act on without itself knowing anything about
//! [`crate::config::AuthPolicy`] or signing.

use crate::config::{AuthPolicyOutcome, ConnectionConfig};
use crate::error::RelayError;
use crate::event::{Event, UnsignedEvent};

/// kind 22242, per the ecosystem's client-authentication NIP.
const CLIENT_AUTH_KIND: u32 = 22242;

pub(super) enum Decision {
    /// No policy decided anything concrete; the host is left to observe the
    /// challenge via [`crate::connection::ConnectionEvent::Auth`].
    Observe,
    /// Build (or accept an already-built) signed event and send it as an
    /// `AUTH` reply.
    Send(Event),
    Abort,
    /// The policy asked for default signing but the connection has no
    /// signer configured.
    Failed(RelayError),
}

pub(super) fn decide(config: &ConnectionConfig, challenge: &str) -> Decision {
    let Some(policy) = &config.auth_policy else {
        return Decision::Observe;
    };

    match policy.decide(&config.url, challenge) {
        AuthPolicyOutcome::Abort => Decision::Abort,
        AuthPolicyOutcome::SignedEvent(event) => Decision::Send(event),
        AuthPolicyOutcome::UseDefault => {
            let Some(signer) = &config.signer else {
                return Decision::Failed(RelayError::NoSigner);
            };
            let unsigned = UnsignedEvent::new(
                signer.pubkey(),
                CLIENT_AUTH_KIND,
                vec![
                    vec!["relay".into(), config.url.to_string()],
                    vec!["challenge".into(), challenge.to_string()],
                ],
                "",
            );
            match signer.sign_event(unsigned) {
                Ok(event) => Decision::Send(event),
                Err(e) => Decision::Failed(e),
            }
        },
    }
}
