//! Connection state machine, reconnect scheduler, and auth coordinator for a
//! single relay connection.
//!
//! Grounded on the teacher's `Wormhole`/`MailboxConnection` pairing in
//! `core.rs`: a small public handle (cheap to clone, holds channel senders)
//! in front of state a background task owns exclusively, the way the
//! teacher's core event loop is the sole mutator of its own `WormholeCore`.
//! Here the "event loop" is simpler — state lives behind one async mutex
//! and is only ever held for the duration of a single state transition, not
//! across an `.await` on socket IO.

mod auth;
pub(crate) mod io;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_std::sync::Mutex;
use futures::channel::{mpsc, oneshot};
use futures::SinkExt;

use crate::config::ConnectionConfig;
use crate::error::RelayError;
use crate::event::Event;
use crate::filter::Filter;
use crate::flap;
use crate::frame::{InboundMessage, OutboundMessage};
use crate::ids::{random_id, CorrelationId};
use crate::registry::{CorrelationRegistry, PendingEntry};
use crate::stats::ConnectionStats;
use crate::subscription::{Subscription, SubscriptionHandle};

use io::{IoEvent, WsWriter};

/// The full state space of a single relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Reconnecting,
    Connected,
    Authenticating,
    Authenticated,
    Disconnecting,
    Flapping,
}

/// Things a host observes about a connection over time. The host drains a
/// plain `mpsc` receiver instead of registering callbacks.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connect,
    Ready,
    Disconnect,
    /// A reconnect attempt has been scheduled to fire after this delay.
    DelayedConnect(Duration),
    Notice(String),
    /// The relay asked for auth and no [`crate::config::AuthPolicy`]
    /// answered with anything but leaving it to the host to observe.
    Auth(String),
    Authed,
    Flapping,
}

struct ConnectionState {
    status: Status,
    registry: CorrelationRegistry,
    stats: ConnectionStats,
    serial: u64,
    writer: Option<WsWriter>,
    /// Consecutive failures since the last successful connect, used by the
    /// cold-start backoff branch and its 5-attempt cap.
    consecutive_failures: u32,
    /// Persists across disconnects, unlike `stats.connected_at` (which
    /// `ConnectionStats::record_disconnect` clears): this is what the
    /// reconnect scheduler's "previous connectedAt" branch reads.
    last_connected_at: Option<Instant>,
    reconnect_scheduled: bool,
    /// Set while an auth event is outstanding, so the `OK` that answers it
    /// can also drive the Connected/Authenticated transition in addition to
    /// resolving the ordinary publish entry it was filed under.
    pending_auth_event_id: Option<CorrelationId>,
}

/// A single relay connection. Cheap to clone: all the mutable state lives
/// behind an `Arc<Mutex<_>>`, and cloning a `Connection` is how the
/// reader task and reconnect timers get their own handle back to it.
#[derive(Clone)]
pub struct Connection {
    config: ConnectionConfig,
    state: Arc<Mutex<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded();
        let connection = Connection {
            config,
            state: Arc::new(Mutex::new(ConnectionState {
                status: Status::Disconnected,
                registry: CorrelationRegistry::new(),
                stats: ConnectionStats::new(),
                serial: 0,
                writer: None,
                consecutive_failures: 0,
                last_connected_at: None,
                reconnect_scheduled: false,
                pending_auth_event_id: None,
            })),
            events_tx,
        };
        (connection, events_rx)
    }

    pub async fn status(&self) -> Status {
        self.state.lock().await.status
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events_tx.unbounded_send(event);
    }

    /// Open the socket. Safe to call from `Disconnected`,
    /// `Flapping`, or `Connected` (the last counts as an explicit
    /// reconnect-now request); no-op transitions aside from those are left
    /// to the caller to avoid — this method does not itself guard against
    /// being called from `Connecting`/`Authenticating`/etc.
    pub async fn connect(&self) -> Result<(), RelayError> {
        {
            let mut state = self.state.lock().await;
            state.status = match state.status {
                Status::Connected => Status::Reconnecting,
                _ => Status::Connecting,
            };
            state.stats.record_attempt();
        }

        match crate::util::timeout(self.config.connect_timeout, io::connect(&self.config.url)).await {
            Ok(Ok((writer, reader))) => {
                let now = Instant::now();
                {
                    let mut state = self.state.lock().await;
                    state.status = Status::Connected;
                    state.writer = Some(writer);
                    state.consecutive_failures = 0;
                    state.stats.record_success(now);
                    state.last_connected_at = Some(now);
                }
                self.spawn_reader(reader);
                tracing::info!(url = %self.config.url, "connected to relay");
                self.emit(ConnectionEvent::Connect);
                self.emit(ConnectionEvent::Ready);
                Ok(())
            },
            Ok(Err(e)) => {
                tracing::warn!(url = %self.config.url, error = %e, "connect failed");
                self.handle_connect_failure().await;
                Err(e)
            },
            Err(_timeout) => {
                tracing::warn!(url = %self.config.url, "connect timed out");
                self.handle_connect_failure().await;
                Err(RelayError::WebSocket("connect timed out".into()))
            },
        }
    }

    async fn handle_connect_failure(&self) {
        let mut state = self.state.lock().await;
        state.status = Status::Disconnected;
        state.consecutive_failures += 1;
        drop(state);
        self.schedule_reconnect().await;
    }

    fn spawn_reader(&self, mut reader: io::WsReader) {
        use futures::StreamExt;
        let connection = self.clone();
        async_std::task::spawn(async move {
            while let Some(event) = reader.next().await {
                match event {
                    IoEvent::MessageReceived(text) => match crate::frame::parse(&text) {
                        Ok(msg) => connection.dispatch(msg).await,
                        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                    },
                    IoEvent::ConnectionLost => break,
                }
            }
            connection.handle_socket_close().await;
        });
    }

    /// The socket ended, whether the host asked it to (`Disconnecting`) or
    /// it just fell over underneath us.
    async fn handle_socket_close(&self) {
        let now = Instant::now();
        let was_explicit = {
            let mut state = self.state.lock().await;
            let was_explicit = state.status == Status::Disconnecting;
            state.writer = None;
            state.stats.record_disconnect(now);
            state.registry.reject_all_pending();
            state.status = Status::Disconnected;
            was_explicit
        };
        self.emit(ConnectionEvent::Disconnect);
        if !was_explicit {
            self.schedule_reconnect().await;
        }
    }

    /// Host-initiated teardown: no reconnect follows.
    pub async fn disconnect(&self) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.as_mut() {
            state.status = Status::Disconnecting;
            let _ = writer.close().await;
        } else {
            state.status = Status::Disconnected;
        }
        Ok(())
    }

    /// The send contract: rejected outright unless `Connected`.
    pub async fn send_frame(&self, msg: OutboundMessage) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if state.status != Status::Connected {
            return Err(RelayError::NotConnected);
        }
        let writer = state.writer.as_mut().ok_or(RelayError::NotConnected)?;
        writer.send(msg.to_string()).await
    }

    fn next_id(state: &mut ConnectionState, prefix: &str) -> CorrelationId {
        state.serial += 1;
        CorrelationId(format!("{prefix}-{}-{}", state.serial, random_id()))
    }

    /// Builds the subscription and registers it, but does not transmit
    /// `REQ` — call [`Connection::fire`] for that.
    pub async fn prepare_subscription(&self, filters: Vec<Filter>) -> Subscription {
        let mut state = self.state.lock().await;
        let id = Self::next_id(&mut state, "sub");
        let (handle, receiver) = SubscriptionHandle::new(id.clone(), filters);
        let closed = handle.closed_flag();
        state.registry.insert(id.clone(), PendingEntry::Subscription(handle));
        Subscription::new(id, closed, receiver)
    }

    pub async fn fire(&self, subscription: &Subscription) -> Result<(), RelayError> {
        let filters = {
            let state = self.state.lock().await;
            state
                .registry
                .get_subscription(&subscription.id)
                .map(|handle| handle.filters.clone())
                .ok_or(RelayError::NotConnected)?
        };
        self.send_frame(OutboundMessage::Req {
            sub_id: subscription.id.clone(),
            filters,
        })
        .await
    }

    pub async fn close_subscription(&self, subscription: &Subscription) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        state.registry.remove_subscription(&subscription.id);
        drop(state);
        self.send_frame(OutboundMessage::Close {
            sub_id: subscription.id.clone(),
        })
        .await
    }

    /// Insert the resolver before the frame that will resolve it goes out,
    /// so the `OK` can never race the registration.
    pub async fn publish(&self, event: Event) -> Result<String, RelayError> {
        if let Some(validator) = &self.config.validator {
            validator.validate(&event)?;
        }
        let id = CorrelationId(event.id.0.clone());
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.registry.insert(id, PendingEntry::Publish(tx));
        }
        self.send_frame(OutboundMessage::Event { event }).await?;
        rx.await.map_err(|_| RelayError::ConnectionClosed)?
    }

    pub async fn count(&self, filters: Vec<Filter>) -> Result<u64, RelayError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock().await;
            let id = Self::next_id(&mut state, "count");
            state.registry.insert(id.clone(), PendingEntry::Count(tx));
            id
        };
        self.send_frame(OutboundMessage::Count { req_id: id, filters }).await?;
        rx.await.map_err(|_| RelayError::ConnectionClosed)?
    }

    /// Route one parsed inbound frame to the registry entry or auth
    /// coordinator it concerns.
    async fn dispatch(&self, msg: InboundMessage) {
        match msg {
            InboundMessage::Event { sub_id, event } => {
                let state = self.state.lock().await;
                if let Some(handle) = state.registry.get_subscription(&sub_id) {
                    handle.deliver_event(event);
                }
            },
            InboundMessage::Eose { sub_id } => {
                let state = self.state.lock().await;
                if let Some(handle) = state.registry.get_subscription(&sub_id) {
                    handle.deliver_eose();
                }
            },
            InboundMessage::Closed { sub_id, reason } => {
                let mut state = self.state.lock().await;
                if let Some(handle) = state.registry.get_subscription(&sub_id) {
                    handle.deliver_closed(reason);
                }
                state.registry.remove_subscription(&sub_id);
            },
            InboundMessage::Ok {
                event_id,
                accepted,
                reason,
            } => {
                let id = CorrelationId(event_id.0.clone());
                let mut auth_completed = false;
                {
                    let mut state = self.state.lock().await;
                    if state.pending_auth_event_id.as_ref() == Some(&id) {
                        state.pending_auth_event_id = None;
                        // A successful challenge returns the FSM to Connected
                        // (rather than a separate Authenticated status) so
                        // sends keep working; see DESIGN.md. A rejected
                        // challenge gets the same recovery (just no `authed`
                        // emission) so a relay that refuses auth doesn't
                        // wedge the connection in `Authenticating` forever.
                        state.status = Status::Connected;
                        auth_completed = accepted;
                    }
                    let result = if accepted { Ok(reason) } else { Err(RelayError::RemoteError(reason)) };
                    if !state.registry.resolve_publish(&id, result) {
                        tracing::warn!(event_id = %event_id, "OK for unknown correlation id");
                    }
                }
                if auth_completed {
                    self.emit(ConnectionEvent::Authed);
                }
            },
            InboundMessage::Count { req_id, count } => {
                let mut state = self.state.lock().await;
                if !state.registry.resolve_count(&req_id, count) {
                    tracing::warn!(req_id = %req_id, "COUNT reply for unknown correlation id");
                }
            },
            InboundMessage::Notice { text } => {
                self.emit(ConnectionEvent::Notice(text.clone()));
                // Relays signal "back off, you're being noisy" through
                // free-text NOTICE rather than a structured code.
                if text.contains("oo many") || text.contains("aximum") {
                    self.trigger_notice_reconnect().await;
                }
            },
            InboundMessage::Auth { challenge } => {
                self.handle_auth_challenge(challenge).await;
            },
        }
    }

    async fn handle_auth_challenge(&self, challenge: String) {
        {
            let mut state = self.state.lock().await;
            // Duplicate challenges while one is already in flight are
            // ignored outright.
            if state.status == Status::Authenticating {
                return;
            }
            state.status = Status::Authenticating;
        }
        match auth::decide(&self.config, &challenge) {
            auth::Decision::Observe => {
                self.emit(ConnectionEvent::Auth(challenge));
                let mut state = self.state.lock().await;
                state.status = Status::Connected;
            },
            auth::Decision::Abort => {
                let mut state = self.state.lock().await;
                state.status = Status::Connected;
            },
            auth::Decision::Failed(e) => {
                tracing::warn!(error = %e, "auth policy could not produce a signed event");
                let mut state = self.state.lock().await;
                state.status = Status::Connected;
            },
            auth::Decision::Send(event) => {
                let id = CorrelationId(event.id.0.clone());
                {
                    let mut state = self.state.lock().await;
                    state.pending_auth_event_id = Some(id.clone());
                    let (tx, _rx) = oneshot::channel();
                    state.registry.insert(id, PendingEntry::Publish(tx));
                }
                if let Err(e) = self.send_frame(OutboundMessage::Auth { event }).await {
                    tracing::warn!(error = %e, "failed to send AUTH reply");
                    let mut state = self.state.lock().await;
                    state.status = Status::Connected;
                    state.pending_auth_event_id = None;
                }
            },
        }
    }

    /// A rate-limit-flavored `NOTICE` forces a fixed 2000ms reconnect,
    /// bypassing the normal backoff schedule.
    async fn trigger_notice_reconnect(&self) {
        {
            let mut state = self.state.lock().await;
            if let Some(writer) = state.writer.as_mut() {
                let _ = writer.close().await;
            }
            state.writer = None;
            state.status = Status::Disconnected;
        }
        self.spawn_delayed_reconnect(Duration::from_millis(2000));
    }

    /// Reconnect scheduler: evaluates flapping, computes the backoff delay,
    /// and arms the delayed-reconnect task.
    async fn schedule_reconnect(&self) {
        let mut state = self.state.lock().await;
        if state.reconnect_scheduled {
            return;
        }
        if flap::is_flapping(&state.stats.durations) {
            state.status = Status::Flapping;
            drop(state);
            self.emit(ConnectionEvent::Flapping);
            return;
        }

        // Cold-start cap: never having connected successfully, stop
        // retrying after 5 scheduled attempts.
        if state.last_connected_at.is_none() && state.consecutive_failures > 5 {
            return;
        }

        let delay = match state.last_connected_at {
            Some(last_connected_at) => {
                let elapsed = Instant::now().saturating_duration_since(last_connected_at);
                let elapsed_ms = elapsed.as_millis() as u64;
                Duration::from_millis(60_000u64.saturating_sub(elapsed_ms))
            },
            None => Duration::from_millis(5_000 * state.consecutive_failures as u64),
        };
        state.reconnect_scheduled = true;
        state.stats.next_reconnect_at = Some(Instant::now() + delay);
        drop(state);

        self.emit(ConnectionEvent::DelayedConnect(delay));
        self.spawn_delayed_reconnect(delay);
    }

    fn spawn_delayed_reconnect(&self, delay: Duration) {
        let connection = self.clone();
        async_std::task::spawn(async move {
            crate::util::sleep(delay).await;
            {
                let mut state = connection.state.lock().await;
                state.reconnect_scheduled = false;
            }
            let _ = connection.connect().await;
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[async_std::test]
    async fn new_connection_starts_disconnected() {
        let (connection, _events) =
            Connection::new(ConnectionConfig::new(url::Url::parse("wss://relay.example").unwrap()));
        assert_eq!(connection.status().await, Status::Disconnected);
    }

    #[async_std::test]
    async fn send_frame_rejected_when_not_connected() {
        let (connection, _events) =
            Connection::new(ConnectionConfig::new(url::Url::parse("wss://relay.example").unwrap()));
        let result = connection
            .send_frame(OutboundMessage::Close {
                sub_id: CorrelationId("s1".into()),
            })
            .await;
        assert!(matches!(result, Err(RelayError::NotConnected)));
    }

    async fn connected_fixture() -> Connection {
        let (connection, _events) =
            Connection::new(ConnectionConfig::new(url::Url::parse("wss://relay.example").unwrap()));
        let mut state = connection.state.lock().await;
        state.status = Status::Authenticating;
        state.pending_auth_event_id = Some(CorrelationId("auth-evt".into()));
        drop(state);
        connection
    }

    #[async_std::test]
    async fn accepted_auth_ok_returns_to_connected_and_emits_authed() {
        let connection = connected_fixture().await;
        connection
            .dispatch(InboundMessage::Ok {
                event_id: crate::ids::EventId("auth-evt".into()),
                accepted: true,
                reason: String::new(),
            })
            .await;
        assert_eq!(connection.status().await, Status::Connected);
        assert!(connection.state.lock().await.pending_auth_event_id.is_none());
    }

    #[async_std::test]
    async fn rejected_auth_ok_still_returns_to_connected_without_wedging() {
        // Leaving `status` stuck in `Authenticating` forever after a relay
        // refuses the challenge would mean every future send fails — see
        // DESIGN.md open question 6.
        let connection = connected_fixture().await;
        connection
            .dispatch(InboundMessage::Ok {
                event_id: crate::ids::EventId("auth-evt".into()),
                accepted: false,
                reason: "restricted".into(),
            })
            .await;
        assert_eq!(connection.status().await, Status::Connected);
    }

    #[async_std::test]
    async fn schedule_reconnect_goes_flapping_on_short_uniform_durations() {
        let (connection, mut events) =
            Connection::new(ConnectionConfig::new(url::Url::parse("wss://relay.example").unwrap()));
        {
            let mut state = connection.state.lock().await;
            state.stats.durations = [500u64, 600, 550].into_iter().collect();
        }
        connection.schedule_reconnect().await;
        assert_eq!(connection.status().await, Status::Flapping);
        assert!(!connection.state.lock().await.reconnect_scheduled);

        use futures::StreamExt;
        assert!(matches!(events.next().await, Some(ConnectionEvent::Flapping)));
    }

    #[async_std::test]
    async fn cold_start_backoff_follows_5000_times_attempts_and_stops_after_five() {
        // A connection that has never connected successfully schedules
        // attempts 1..5 at 5000, 10000, ..., 25000ms, then stops.
        // `schedule_reconnect` computes and emits the delay for one attempt
        // at a time; this drives it through all six calls.
        use futures::StreamExt;
        let (connection, mut events) =
            Connection::new(ConnectionConfig::new(url::Url::parse("wss://relay.example").unwrap()));

        let expected_delays = [5_000u64, 10_000, 15_000, 20_000, 25_000];
        for expected_ms in expected_delays {
            {
                let mut state = connection.state.lock().await;
                state.consecutive_failures += 1;
                state.reconnect_scheduled = false;
            }
            connection.schedule_reconnect().await;
            match events.next().await {
                Some(ConnectionEvent::DelayedConnect(delay)) => {
                    assert_eq!(delay, Duration::from_millis(expected_ms));
                },
                other => panic!("unexpected: {other:?}"),
            }
            // Cancel the spawned sleep-then-reconnect task's effect on
            // `reconnect_scheduled` for the next iteration by resetting it
            // above rather than waiting out the real delay.
        }

        // The 6th failure crosses the 5-attempt cap: no further attempt.
        {
            let mut state = connection.state.lock().await;
            state.consecutive_failures += 1;
            state.reconnect_scheduled = false;
        }
        connection.schedule_reconnect().await;
        assert!(events.try_next().is_err(), "no 6th attempt should be scheduled");
    }
}
