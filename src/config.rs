//! Per-connection configuration and the auth coordinator's policy
//! interface.
//!
//! Grounded on the teacher's `AppConfig<V>` builder pattern in `core.rs`
//! (`.id(..)`, `.rendezvous_url(..)`, `.app_version(..)` chained setters).

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::collaborators::{EventValidator, Signer};
use crate::event::Event;

/// Outcome of an [`AuthPolicy`] invocation, expressed as a tagged variant
/// rather than a polymorphic boolean/event/falsy return.
#[derive(Debug, Clone)]
pub enum AuthPolicyOutcome {
    /// Build a default auth event and sign it with the connection's
    /// configured [`Signer`].
    UseDefault,
    /// The policy already produced a signed event; dispatch it as-is.
    SignedEvent(Event),
    /// Decline to respond to this challenge.
    Abort,
}

/// Decides how to respond to a relay's `AUTH` challenge.
pub trait AuthPolicy: Send + Sync {
    fn decide(&self, relay_url: &Url, challenge: &str) -> AuthPolicyOutcome;
}

/// Configuration for a single relay [`crate::connection::Connection`].
#[derive(Clone)]
pub struct ConnectionConfig {
    pub url: Url,
    pub connect_timeout: Duration,
    pub auth_policy: Option<Arc<dyn AuthPolicy>>,
    pub base_eose_timeout: Duration,
    pub signer: Option<Arc<dyn Signer>>,
    pub validator: Option<Arc<dyn EventValidator>>,
}

impl ConnectionConfig {
    pub fn new(url: Url) -> Self {
        ConnectionConfig {
            url,
            connect_timeout: Duration::from_secs(10),
            auth_policy: None,
            base_eose_timeout: Duration::from_millis(4400),
            signer: None,
            validator: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn auth_policy(mut self, policy: Arc<dyn AuthPolicy>) -> Self {
        self.auth_policy = Some(policy);
        self
    }

    pub fn base_eose_timeout(mut self, timeout: Duration) -> Self {
        self.base_eose_timeout = timeout;
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn EventValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

#[cfg(test)]
mod test {
    use test_log::test;
    use super::*;

    #[test]
    fn default_base_eose_timeout_is_4400ms() {
        let config = ConnectionConfig::new(Url::parse("wss://relay.example").unwrap());
        assert_eq!(config.base_eose_timeout, Duration::from_millis(4400));
    }
}
