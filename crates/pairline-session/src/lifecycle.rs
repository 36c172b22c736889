//! The lifecycle controller: drives one session's protocol client from
//! creation to `connected` (or `disconnected`), then keeps pumping the
//! client's events into the session for as long as it lives.
//!
//! # Flow
//!
//! ```text
//!               has stored identity?
//!                 ┌──────┴──────┐
//!               yes             no
//!                 │              │
//!           connect()       subscribe + connect()
//!                 │              │
//!     connected / disconnected   wait (deadline) for the first of:
//!                 │                 code ──→ qr_required
//!                 │                 success ──→ connected
//!                 │                 deadline ──→ disconnected + removed
//!                 └──────┬──────┘
//!                   event pump
//! ```
//!
//! Everything here runs inside one spawned task per session. Nothing is
//! returned to a caller, so every failure is turned into a transition and
//! logged. The task is never cancelled from outside; when the session is
//! torn down underneath it, the next transition is refused or the next
//! registry check fails, and the task winds down on its own.

use std::sync::Arc;

use pairline_protocol::{PushEvent, SessionStatus};
use pairline_transport::Connection;
use tokio::sync::mpsc;

use crate::{
    fanout, ClientEvent, Phase, ProtocolClient, Registry, Session,
    SessionConfig,
};

/// First result of a fresh pairing.
enum Pairing {
    Code(String),
    Success(String),
}

/// Runs the handshake for `session` and then its event pump.
///
/// A no-op if the session is no longer registered, is already connected,
/// or has no client attached.
pub async fn run_handshake<C, L>(
    registry: Arc<Registry<C, L>>,
    session: Arc<Session<C, L>>,
    config: SessionConfig,
) where
    C: ProtocolClient,
    L: Connection,
{
    let id = session.id().clone();

    if !registry.is_current(&session) {
        tracing::debug!(session_id = %id, "session gone before handshake started");
        return;
    }
    if session.status() == SessionStatus::Connected {
        tracing::debug!(session_id = %id, "session already connected, skipping handshake");
        return;
    }
    let Some(client) = session.client().await else {
        tracing::warn!(session_id = %id, "no protocol client attached, skipping handshake");
        return;
    };

    // Subscribe before connecting so the first pairing code cannot be
    // missed.
    let mut events = client.subscribe_events();

    let proceed = if client.has_stored_identity() {
        reconnect(&session, client.as_ref()).await
    } else {
        pair(&registry, &session, client.as_ref(), &mut events, &config).await
    };

    if proceed {
        pump(&registry, &session, client.as_ref(), events).await;
    }
}

/// Reconnect path: the device is already paired, so no code is shown.
async fn reconnect<C, L>(session: &Session<C, L>, client: &C) -> bool
where
    C: ProtocolClient,
    L: Connection,
{
    let id = session.id();
    tracing::info!(session_id = %id, "reconnecting with stored identity");

    if let Err(e) = client.connect().await {
        tracing::warn!(session_id = %id, error = %e, "reconnect failed");
        mark_disconnected(session).await;
        return false;
    }

    let Some(identity) = client.identity() else {
        tracing::warn!(session_id = %id, "client connected without an identity");
        client.disconnect().await;
        mark_disconnected(session).await;
        return false;
    };

    let event = PushEvent::connected(id.clone(), Some(identity.clone()));
    if !session
        .transition(Phase::Connected { identity }, Some(&event))
        .await
    {
        // Torn down while we were connecting.
        client.disconnect().await;
        return false;
    }
    true
}

/// First-pairing path: connect, then wait for a code or a success.
async fn pair<C, L>(
    registry: &Registry<C, L>,
    session: &Arc<Session<C, L>>,
    client: &C,
    events: &mut mpsc::Receiver<ClientEvent>,
    config: &SessionConfig,
) -> bool
where
    C: ProtocolClient,
    L: Connection,
{
    let id = session.id();
    tracing::info!(session_id = %id, "starting first pairing");

    if let Err(e) = client.connect().await {
        tracing::warn!(session_id = %id, error = %e, "connect failed");
        mark_disconnected(session).await;
        return false;
    }

    let first = tokio::time::timeout(
        config.handshake_timeout,
        first_pairing_result(session, events),
    )
    .await;

    match first {
        Ok(Some(Pairing::Code(code))) => {
            tracing::info!(session_id = %id, "pairing code received");
            let event = PushEvent::qr_code(id.clone(), code.clone());
            session
                .transition(Phase::QrRequired { code }, Some(&event))
                .await
        }
        Ok(Some(Pairing::Success(identity))) => {
            tracing::info!(session_id = %id, "paired without a code");
            let event =
                PushEvent::connected(id.clone(), Some(identity.clone()));
            session
                .transition(Phase::Connected { identity }, Some(&event))
                .await
        }
        Ok(None) => {
            // An explicit disconnect ends the stream too; only a stream
            // that closed on its own needs cleaning up here.
            if registry.is_current(session) {
                tracing::warn!(session_id = %id, "event stream closed before pairing result");
                client.disconnect().await;
                mark_disconnected(session).await;
            }
            false
        }
        Err(_) => {
            tracing::warn!(
                session_id = %id,
                timeout_secs = config.handshake_timeout.as_secs(),
                "pairing timed out"
            );
            let released = session.shut_down().await;
            fanout::close_all(id, released.listeners).await;
            if let Some(client) = released.client {
                client.disconnect().await;
            }
            registry.remove_if_same(session);
            false
        }
    }
}

async fn first_pairing_result<C, L>(
    session: &Session<C, L>,
    events: &mut mpsc::Receiver<ClientEvent>,
) -> Option<Pairing>
where
    C: ProtocolClient,
    L: Connection,
{
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::PairingCode { code } => return Some(Pairing::Code(code)),
            ClientEvent::PairingSuccess { identity } => {
                return Some(Pairing::Success(identity));
            }
            other => {
                tracing::debug!(
                    session_id = %session.id(),
                    event = ?other,
                    "ignoring event before pairing result"
                );
            }
        }
    }
    None
}

/// Feeds client events into the session until it is replaced, removed, or
/// disconnected, or the stream ends.
async fn pump<C, L>(
    registry: &Registry<C, L>,
    session: &Arc<Session<C, L>>,
    client: &C,
    mut events: mpsc::Receiver<ClientEvent>,
) where
    C: ProtocolClient,
    L: Connection,
{
    while let Some(event) = events.recv().await {
        if !registry.is_current(session) {
            tracing::debug!(session_id = %session.id(), "session no longer registered");
            break;
        }
        if !handle_event(session, client, event).await {
            break;
        }
    }
    tracing::debug!(session_id = %session.id(), "event pump stopped");
}

/// Applies one event. Returns `false` once the session is disconnected.
async fn handle_event<C, L>(
    session: &Session<C, L>,
    client: &C,
    event: ClientEvent,
) -> bool
where
    C: ProtocolClient,
    L: Connection,
{
    let id = session.id().clone();

    match event {
        ClientEvent::PairingCode { code } => {
            let event = PushEvent::qr_code(id, code.clone());
            session
                .transition(Phase::QrRequired { code }, Some(&event))
                .await;
        }
        ClientEvent::PairingSuccess { identity } => {
            let event = PushEvent::connected(id, Some(identity.clone()));
            session
                .transition(Phase::Connected { identity }, Some(&event))
                .await;
        }
        ClientEvent::Connected => match session.phase().await {
            Phase::Connected { identity } => {
                session
                    .publish(&PushEvent::connected(id, Some(identity)))
                    .await;
            }
            _ => {
                if let Some(identity) = client.identity() {
                    let event =
                        PushEvent::connected(id, Some(identity.clone()));
                    session
                        .transition(Phase::Connected { identity }, Some(&event))
                        .await;
                }
            }
        },
        ClientEvent::Disconnected => {
            tracing::warn!(session_id = %id, "client reported disconnect");
            mark_disconnected(session).await;
        }
        ClientEvent::MessageReceived {
            id: message_id,
            chat,
            sender,
            text,
            timestamp,
        } => {
            tracing::debug!(session_id = %id, %message_id, "inbound message");
            let event = PushEvent::message_received(
                message_id, chat, sender, &text, timestamp,
            );
            session.publish(&event).await;
        }
    }

    session.status() != SessionStatus::Disconnected
}

async fn mark_disconnected<C, L>(session: &Session<C, L>)
where
    C: ProtocolClient,
    L: Connection,
{
    let event = PushEvent::disconnected(session.id().clone());
    session.transition(Phase::Disconnected, Some(&event)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pairline_protocol::SessionId;
    use pairline_transport::{channel_pair, ChannelConnection};

    use super::*;
    use crate::sim::SimClient;
    use crate::Credentials;

    type TestRegistry = Registry<SimClient, ChannelConnection>;

    /// Lets spawned tasks run until they block again.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn start(
        registry: &Arc<TestRegistry>,
        id: &str,
        client: SimClient,
    ) -> Arc<Session<SimClient, ChannelConnection>> {
        let (session, _) =
            registry.create(SessionId::from(id), Credentials::default());
        session.install_client(Arc::new(client)).await;
        tokio::spawn(run_handshake(
            Arc::clone(registry),
            Arc::clone(&session),
            SessionConfig::default(),
        ));
        settle().await;
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handshake_unregistered_session_is_noop() {
        let registry = Arc::new(TestRegistry::new());
        let (session, _) =
            registry.create(SessionId::from("s1"), Credentials::default());
        let client = SimClient::standalone("s1");
        session.install_client(Arc::new(client.clone())).await;
        registry.remove(session.id());

        run_handshake(registry, session, SessionConfig::default()).await;

        assert_eq!(client.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handshake_stored_identity_skips_pairing() {
        let registry = Arc::new(TestRegistry::new());
        let client = SimClient::paired("s1", "5511999999999");

        let session = start(&registry, "s1", client.clone()).await;

        let snap = session.snapshot().await;
        assert_eq!(snap.status, SessionStatus::Connected);
        assert_eq!(snap.phone_number.as_deref(), Some("5511999999999"));
        assert!(snap.qr_code.is_none());
        assert_eq!(client.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handshake_connect_error_marks_disconnected() {
        let registry = Arc::new(TestRegistry::new());
        let client = SimClient::standalone("s1");
        client.fail_connects(true);

        let session = start(&registry, "s1", client).await;

        assert_eq!(session.status(), SessionStatus::Disconnected);
        // Connect errors keep the entry so the caller can see why.
        assert!(registry.is_current(&session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_code_refresh_updates_code_and_republishes() {
        let registry = Arc::new(TestRegistry::new());
        let client = SimClient::standalone("s1");
        let session = start(&registry, "s1", client.clone()).await;
        let (conn, mut peer) = channel_pair();
        session.add_listener(Arc::new(conn)).await;

        client.emit_pairing_code("FIRST").await;
        settle().await;
        client.emit_pairing_code("SECOND").await;
        settle().await;

        assert_eq!(session.phase().await.pairing_code(), Some("SECOND"));
        let codes: Vec<String> = std::iter::from_fn(|| peer.try_recv())
            .map(|f| {
                let v: serde_json::Value = serde_json::from_slice(&f).unwrap();
                v["data"]["qrCode"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(codes, vec!["FIRST", "SECOND"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_unsolicited_disconnect_stops_pumping() {
        let registry = Arc::new(TestRegistry::new());
        let client = SimClient::paired("s1", "55");
        let session = start(&registry, "s1", client.clone()).await;

        client.emit(ClientEvent::Disconnected).await;
        settle().await;
        // Later events are not applied to a disconnected session.
        client.emit_pairing_success("66").await;
        settle().await;

        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(session.snapshot().await.phone_number.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_events_before_result_are_ignored() {
        let registry = Arc::new(TestRegistry::new());
        let client = SimClient::standalone("s1");
        let session = start(&registry, "s1", client.clone()).await;

        client.emit(ClientEvent::Connected).await;
        settle().await;
        assert_eq!(session.status(), SessionStatus::Connecting);

        client.emit_pairing_code("ABC").await;
        settle().await;
        assert_eq!(session.status(), SessionStatus::QrRequired);
    }
}
