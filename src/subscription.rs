//! Subscription handle.
//!
//! Delivery is a `futures` mpsc channel rather than raw event/EOSE/close
//! callbacks: the owning task drains a [`Subscription`]'s `events()` stream
//! instead of registering closures the connection task would have to invoke
//! directly (and which would tie the connection's lifetime to the host's
//! panic-safety).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;

use crate::event::Event;
use crate::filter::{matches_any, Filter};
use crate::ids::CorrelationId;

/// One event delivered to a subscription's owner.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Event(Event),
    Eose,
    Closed(String),
}

/// The connection-side half: stored in the connection's registry, used to
/// route inbound frames. Not exposed to the host directly.
pub(crate) struct SubscriptionHandle {
    pub id: CorrelationId,
    pub filters: Vec<Filter>,
    closed: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionHandle {
    pub fn new(
        id: CorrelationId,
        filters: Vec<Filter>,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (sender, receiver) = mpsc::unbounded();
        let handle = SubscriptionHandle {
            id,
            filters,
            closed: Arc::new(AtomicBool::new(false)),
            sender,
        };
        (handle, receiver)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Route an `EVENT` frame: deliver only if it matches, and never once
    /// `closed` — once closed, a subscription must never be delivered
    /// further events.
    pub fn deliver_event(&self, event: Event) {
        if self.is_closed() {
            return;
        }
        if matches_any(&self.filters, &event) {
            let _ = self.sender.unbounded_send(SubscriptionEvent::Event(event));
        }
    }

    pub fn deliver_eose(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.sender.unbounded_send(SubscriptionEvent::Eose);
    }

    /// Route a `CLOSED` frame: sets `closed` and delivers the reason exactly
    /// once. The registry entry removal is the caller's (`Connection`'s)
    /// responsibility.
    pub fn deliver_closed(&self, reason: String) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.unbounded_send(SubscriptionEvent::Closed(reason));
    }
}

/// The host-side handle returned by `Connection::prepare_subscription`.
pub struct Subscription {
    pub id: CorrelationId,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub(crate) fn new(
        id: CorrelationId,
        closed: Arc<AtomicBool>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> Self {
        Subscription { id, closed, events }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The channel of delivered events; the host polls this with
    /// `StreamExt::next()`.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<SubscriptionEvent> {
        &mut self.events
    }

    /// Consume the handle, keeping only the event channel. Used by
    /// [`crate::signer::SignerSession`], which owns its long-lived
    /// subscription outright rather than exposing it to its own host.
    pub(crate) fn into_receiver(self) -> mpsc::UnboundedReceiver<SubscriptionEvent> {
        self.events
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::{EventId, PubKey};
    use futures::StreamExt;

    fn event(kind: u32) -> Event {
        Event {
            id: EventId("e1".into()),
            pubkey: PubKey("p1".into()),
            created_at: 1,
            kind,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[async_std::test]
    async fn delivers_matching_event_and_drops_mismatched() {
        let (handle, mut receiver) =
            SubscriptionHandle::new(CorrelationId("s1".into()), vec![Filter::kinds(vec![1])]);

        handle.deliver_event(event(1));
        handle.deliver_event(event(2));
        handle.deliver_eose();

        assert!(matches!(
            receiver.next().await,
            Some(SubscriptionEvent::Event(e)) if e.kind == 1
        ));
        assert!(matches!(receiver.next().await, Some(SubscriptionEvent::Eose)));
    }

    #[async_std::test]
    async fn closed_handle_stops_delivery() {
        let (handle, mut receiver) =
            SubscriptionHandle::new(CorrelationId("s1".into()), vec![Filter::kinds(vec![1])]);

        handle.deliver_closed("rate-limited".into());
        handle.deliver_event(event(1));

        assert!(matches!(
            receiver.next().await,
            Some(SubscriptionEvent::Closed(reason)) if reason == "rate-limited"
        ));
        assert!(handle.is_closed());

        // No further message was queued behind the CLOSED notification.
        receiver.close();
        assert!(receiver.next().await.is_none());
    }

    #[async_std::test]
    async fn closed_is_delivered_only_once() {
        let (handle, mut receiver) =
            SubscriptionHandle::new(CorrelationId("s1".into()), vec![]);
        handle.deliver_closed("a".into());
        handle.deliver_closed("b".into());
        drop(handle);

        let mut count = 0;
        while let Some(_msg) = receiver.next().await {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
