//! Correlation registry: maps per-connection correlation ids to whatever is
//! waiting on the reply — a subscription, a count query, or a publish.
//!
//! Subscriptions, count queries, and publishes could each get their own map
//! keyed by id, but a single map keyed by id whose value is a tagged variant
//! makes "a correlation id names at most one pending thing" true by
//! construction instead of an invariant callers have to maintain by hand.

use std::collections::HashMap;

use futures::channel::oneshot;

use crate::error::RelayError;
use crate::ids::CorrelationId;
use crate::subscription::SubscriptionHandle;

/// The result of a publish: the reason string from the first matching `OK`.
pub type PublishResult = Result<String, RelayError>;

pub(crate) enum PendingEntry {
    Subscription(SubscriptionHandle),
    Count(oneshot::Sender<Result<u64, RelayError>>),
    Publish(oneshot::Sender<PublishResult>),
}

#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    entries: HashMap<CorrelationId, PendingEntry>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert must happen before the frame that will elicit the reply is
    /// sent, so the reply can never race the registration.
    pub fn insert(&mut self, id: CorrelationId, entry: PendingEntry) {
        self.entries.insert(id, entry);
    }

    pub fn get_subscription(&self, id: &CorrelationId) -> Option<&SubscriptionHandle> {
        match self.entries.get(id) {
            Some(PendingEntry::Subscription(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn remove_subscription(&mut self, id: &CorrelationId) -> Option<SubscriptionHandle> {
        match self.entries.remove(id) {
            Some(PendingEntry::Subscription(handle)) => Some(handle),
            Some(other) => {
                // Put back an entry of a different kind; removing a
                // subscription id that actually names a count/publish is a
                // caller bug, not something we should silently eat.
                self.entries.insert(id.clone(), other);
                None
            },
            None => None,
        }
    }

    pub fn resolve_count(&mut self, id: &CorrelationId, count: u64) -> bool {
        match self.entries.remove(id) {
            Some(PendingEntry::Count(resolver)) => {
                let _ = resolver.send(Ok(count));
                true
            },
            Some(other) => {
                self.entries.insert(id.clone(), other);
                false
            },
            None => false,
        }
    }

    pub fn resolve_publish(&mut self, id: &CorrelationId, result: PublishResult) -> bool {
        match self.entries.remove(id) {
            Some(PendingEntry::Publish(resolver)) => {
                let _ = resolver.send(result);
                true
            },
            Some(other) => {
                self.entries.insert(id.clone(), other);
                false
            },
            None => false,
        }
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject every pending resolver with `ConnectionClosed` on connection
    /// teardown. Subscriptions have no resolver to reject, but their owner
    /// still needs to learn the connection is gone — delivered as an
    /// ordinary `Closed` notification so a signer session watching its
    /// long-lived subscription can reject its own pending requests in turn.
    pub fn reject_all_pending(&mut self) {
        for (_, entry) in self.entries.drain() {
            match entry {
                PendingEntry::Count(resolver) => {
                    let _ = resolver.send(Err(RelayError::ConnectionClosed));
                },
                PendingEntry::Publish(resolver) => {
                    let _ = resolver.send(Err(RelayError::ConnectionClosed));
                },
                PendingEntry::Subscription(handle) => {
                    handle.deliver_closed("connection closed".into());
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use test_log::test;
    use super::*;
    use crate::filter::Filter;

    #[test]
    fn correlation_id_lives_in_at_most_one_entry() {
        let mut registry = CorrelationRegistry::new();
        let (handle, _rx) = SubscriptionHandle::new(CorrelationId("s1".into()), vec![Filter::default()]);
        registry.insert(CorrelationId("s1".into()), PendingEntry::Subscription(handle));

        assert!(registry.get_subscription(&CorrelationId("s1".into())).is_some());

        // Re-inserting under the same id with a different kind replaces it —
        // still exactly one entry for that id, never both.
        let (tx, _rx2) = oneshot::channel();
        registry.insert(CorrelationId("s1".into()), PendingEntry::Count(tx));
        assert!(registry.get_subscription(&CorrelationId("s1".into())).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[async_std::test]
    async fn reject_all_pending_rejects_counts_and_publishes() {
        let mut registry = CorrelationRegistry::new();
        let (count_tx, count_rx) = oneshot::channel();
        let (pub_tx, pub_rx) = oneshot::channel();
        registry.insert(CorrelationId("c1".into()), PendingEntry::Count(count_tx));
        registry.insert(CorrelationId("p1".into()), PendingEntry::Publish(pub_tx));

        registry.reject_all_pending();

        assert!(matches!(count_rx.await.unwrap(), Err(RelayError::ConnectionClosed)));
        assert!(matches!(pub_rx.await.unwrap(), Err(RelayError::ConnectionClosed)));
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_publish_removes_entry_so_later_ok_is_ignored() {
        let mut registry = CorrelationRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let id = CorrelationId("E".into());
        registry.insert(id.clone(), PendingEntry::Publish(tx));

        assert!(registry.resolve_publish(&id, Ok("stored".into())));
        assert!(!registry.resolve_publish(&id, Ok("ignored".into())));

        drop(registry);
        assert_eq!(rx.try_recv().unwrap().unwrap().unwrap(), "stored");
    }
}
