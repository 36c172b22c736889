//! The session entity: one logical connection to the messaging network.
//!
//! A session tracks:
//! - WHO it belongs to (the caller-chosen [`SessionId`] and credentials)
//! - WHERE it is in pairing ([`Phase`])
//! - WHAT it talks through (the protocol client it owns)
//! - WHO is listening (push-channel connections, keyed by id)

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pairline_protocol::{Address, PushEvent, SessionId, SessionSnapshot, SessionStatus};
use pairline_transport::{Connection, ConnectionId};
use tokio::sync::{watch, RwLock};

use crate::fanout;
use crate::{ProtocolClient, SendReceipt, SessionError};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timing and sizing knobs for the session layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a first pairing may wait for its first result (a code or
    /// a success) before the session is dropped.
    ///
    /// Default: 30 seconds.
    pub handshake_timeout: Duration,

    /// Upper bound between re-checks while a caller waits for a pairing
    /// code. Status changes wake the waiter immediately; this only bounds
    /// how stale a missed wake-up can get.
    ///
    /// Default: 500 ms.
    pub qr_poll_interval: Duration,

    /// Capacity of each client event channel.
    ///
    /// Default: 64.
    pub event_buffer: usize,

    /// Directory under which each session's device store lives, one
    /// subdirectory per session id.
    ///
    /// Default: `./sessions`.
    pub store_root: PathBuf,
}

impl SessionConfig {
    /// Where the device store for `session` lives.
    pub fn store_dir(&self, session: &SessionId) -> PathBuf {
        self.store_root.join(session.as_str())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            qr_poll_interval: Duration::from_millis(500),
            event_buffer: 64,
            store_root: PathBuf::from("./sessions"),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle, with the data each stage owns.
///
/// ```text
///   Connecting ──(code)──→ QrRequired ──(success)──→ Connected
///       │                    ↺ (code refresh)           │
///       └──────────(success / reconnect)────────────────┘
///
///   any ──(timeout | disconnect | connect error)──→ Disconnected
/// ```
///
/// Carrying the pairing code inside `QrRequired` and the identity inside
/// `Connected` means "code present iff qr_required" and "identity present
/// iff connected" cannot be violated: there is nowhere else to put them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    QrRequired { code: String },
    Connected { identity: String },
}

impl Phase {
    /// The wire status for this phase.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Disconnected => SessionStatus::Disconnected,
            Self::Connecting => SessionStatus::Connecting,
            Self::QrRequired { .. } => SessionStatus::QrRequired,
            Self::Connected { .. } => SessionStatus::Connected,
        }
    }

    pub fn pairing_code(&self) -> Option<&str> {
        match self {
            Self::QrRequired { code } => Some(code),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Connected { identity } => Some(identity),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Caller-supplied secrets. Stored with the session, never interpreted.
#[derive(Clone, Default)]
pub struct Credentials {
    pub credential_key: String,
    pub access_token: String,
    /// Where the caller would like events mirrored. Recorded only.
    pub webhook_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("credential_key", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("webhook_url", &self.webhook_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single session.
///
/// Every mutable field lives behind one async lock, so transitions for a
/// session are totally ordered. The current status is also mirrored into a
/// `watch` channel, which lets the registry (under its own synchronous
/// lock) and pairing-code waiters read it without touching that lock. For
/// the same reason the installed client is also reachable through `link`,
/// so the registry can ask whether a `connected` session's link is
/// actually up.
pub struct Session<C, L> {
    id: SessionId,
    credentials: Credentials,
    created_at: DateTime<Utc>,
    status_tx: watch::Sender<SessionStatus>,
    link: OnceLock<Arc<C>>,
    state: RwLock<SessionState<C, L>>,
}

struct SessionState<C, L> {
    phase: Phase,
    client: Option<Arc<C>>,
    listeners: HashMap<ConnectionId, Arc<L>>,
    updated_at: DateTime<Utc>,
}

/// What a shut-down session hands back for teardown outside its lock.
pub(crate) struct Released<C, L> {
    pub client: Option<Arc<C>>,
    pub listeners: Vec<Arc<L>>,
}

impl<C: ProtocolClient, L: Connection> Session<C, L> {
    /// Creates a session in `connecting`, with no client and no listeners.
    pub fn new(id: SessionId, credentials: Credentials) -> Self {
        let now = Utc::now();
        let (status_tx, _) = watch::channel(SessionStatus::Connecting);
        Self {
            id,
            credentials,
            created_at: now,
            status_tx,
            link: OnceLock::new(),
            state: RwLock::new(SessionState {
                phase: Phase::Connecting,
                client: None,
                listeners: HashMap::new(),
                updated_at: now,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current status, read from the mirror without locking.
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Whether the session is `connected` and its client says the link is
    /// up. Lock-free, like [`status`](Self::status).
    pub fn is_live(&self) -> bool {
        self.status() == SessionStatus::Connected
            && self.link.get().is_some_and(|client| client.is_connected())
    }

    /// A receiver that wakes on every transition (including pairing-code
    /// refreshes, which keep the status at `qr_required`).
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase.clone()
    }

    /// A consistent point-in-time view for the API.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            session: self.id.clone(),
            status: state.phase.status(),
            qr_code: state.phase.pairing_code().map(str::to_owned),
            phone_number: state.phase.identity().map(str::to_owned),
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.state.read().await.listeners.len()
    }

    pub(crate) async fn client(&self) -> Option<Arc<C>> {
        self.state.read().await.client.clone()
    }

    /// Attaches the protocol client. Refused once the session has been
    /// disconnected, so a client built for a torn-down session is never
    /// driven.
    pub(crate) async fn install_client(&self, client: Arc<C>) -> bool {
        let mut state = self.state.write().await;
        if matches!(state.phase, Phase::Disconnected) {
            return false;
        }
        let _ = self.link.set(Arc::clone(&client));
        state.client = Some(client);
        true
    }

    /// Sends a text message through the session's client.
    ///
    /// The read lock is held for the whole call, so a teardown (which
    /// needs the write lock) waits for in-flight sends and no send starts
    /// on a client that has been released.
    ///
    /// # Errors
    /// - [`SessionError::NotConnected`]: not `connected`, or the link is down
    /// - [`SessionError::InvalidInput`]: malformed recipient
    /// - [`SessionError::Protocol`]: the client failed the send
    pub(crate) async fn send_text(
        &self,
        to: &str,
        text: &str,
    ) -> Result<(Address, SendReceipt), SessionError> {
        let state = self.state.read().await;
        let client = match (&state.phase, &state.client) {
            (Phase::Connected { .. }, Some(client)) if client.is_connected() => client,
            _ => return Err(SessionError::NotConnected(self.id.clone())),
        };
        let address = Address::parse(to)
            .map_err(|e| SessionError::InvalidInput(e.to_string()))?;

        let receipt = client
            .send_text(&address, text)
            .await
            .map_err(SessionError::Protocol)?;
        Ok((address, receipt))
    }

    /// Moves to `next` and, in the same critical section, delivers `event`
    /// to every listener.
    ///
    /// Returns `false` (and changes nothing) if the move is not a legal
    /// transition from the current phase. In particular nothing leaves
    /// `disconnected`, which is how a late handshake discovers that its
    /// session was torn down underneath it.
    pub(crate) async fn transition(
        &self,
        next: Phase,
        event: Option<&PushEvent>,
    ) -> bool {
        let mut state = self.state.write().await;
        let from = state.phase.status();
        let to = next.status();
        if !from.can_transition_to(to) {
            tracing::debug!(
                session_id = %self.id,
                %from,
                %to,
                "ignoring illegal transition"
            );
            return false;
        }

        state.phase = next;
        state.updated_at = Utc::now();
        self.status_tx.send_replace(to);
        tracing::info!(session_id = %self.id, %from, %to, "session transition");

        if let Some(event) = event {
            fanout::deliver(&self.id, state.listeners.values(), event).await;
        }
        true
    }

    /// Delivers an event without changing state.
    pub(crate) async fn publish(&self, event: &PushEvent) {
        let state = self.state.read().await;
        fanout::deliver(&self.id, state.listeners.values(), event).await;
    }

    pub(crate) async fn add_listener(&self, listener: Arc<L>) {
        let mut state = self.state.write().await;
        tracing::debug!(session_id = %self.id, conn = %listener.id(), "listener subscribed");
        state.listeners.insert(listener.id(), listener);
    }

    pub(crate) async fn remove_listener(
        &self,
        conn: ConnectionId,
    ) -> Option<Arc<L>> {
        self.state.write().await.listeners.remove(&conn)
    }

    pub(crate) async fn take_listeners(&self) -> Vec<Arc<L>> {
        let mut state = self.state.write().await;
        state.listeners.drain().map(|(_, l)| l).collect()
    }

    pub(crate) async fn adopt_listeners(&self, listeners: Vec<Arc<L>>) {
        let mut state = self.state.write().await;
        for listener in listeners {
            state.listeners.insert(listener.id(), listener);
        }
    }

    /// Moves to `disconnected`, tells the listeners, and hands back the
    /// client and listeners so the caller can close them without holding
    /// the lock.
    pub(crate) async fn shut_down(&self) -> Released<C, L> {
        let mut state = self.state.write().await;
        if !matches!(state.phase, Phase::Disconnected) {
            let from = state.phase.status();
            state.phase = Phase::Disconnected;
            state.updated_at = Utc::now();
            self.status_tx.send_replace(SessionStatus::Disconnected);
            tracing::info!(session_id = %self.id, %from, "session shut down");
        }

        let event = PushEvent::disconnected(self.id.clone());
        fanout::deliver(&self.id, state.listeners.values(), &event).await;

        Released {
            client: state.client.take(),
            listeners: state.listeners.drain().map(|(_, l)| l).collect(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use pairline_transport::{channel_pair, ChannelConnection};

    use super::*;
    use crate::sim::SimClient;

    type TestSession = Session<SimClient, ChannelConnection>;

    fn session(id: &str) -> TestSession {
        Session::new(SessionId::from(id), Credentials::default())
    }

    // =====================================================================
    // new() / snapshot()
    // =====================================================================

    #[tokio::test]
    async fn test_new_session_starts_connecting_without_code_or_identity() {
        let s = session("s1");

        assert_eq!(s.status(), SessionStatus::Connecting);
        let snap = s.snapshot().await;
        assert_eq!(snap.session.as_str(), "s1");
        assert_eq!(snap.status, SessionStatus::Connecting);
        assert!(snap.qr_code.is_none());
        assert!(snap.phone_number.is_none());
        assert_eq!(snap.created_at, snap.updated_at);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            credential_key: "super-secret".into(),
            access_token: "tok-123".into(),
            webhook_url: None,
        };
        let out = format!("{creds:?}");
        assert!(!out.contains("super-secret"));
        assert!(!out.contains("tok-123"));
    }

    // =====================================================================
    // transition()
    // =====================================================================

    #[tokio::test]
    async fn test_transition_to_qr_required_exposes_code_in_snapshot() {
        let s = session("s1");

        let applied = s
            .transition(Phase::QrRequired { code: "ABC123".into() }, None)
            .await;

        assert!(applied);
        assert_eq!(s.status(), SessionStatus::QrRequired);
        let snap = s.snapshot().await;
        assert_eq!(snap.qr_code.as_deref(), Some("ABC123"));
        assert!(snap.phone_number.is_none());
    }

    #[tokio::test]
    async fn test_transition_to_connected_drops_code_and_sets_identity() {
        let s = session("s1");
        s.transition(Phase::QrRequired { code: "ABC123".into() }, None)
            .await;

        s.transition(
            Phase::Connected { identity: "5511999999999".into() },
            None,
        )
        .await;

        let snap = s.snapshot().await;
        assert_eq!(snap.status, SessionStatus::Connected);
        assert!(snap.qr_code.is_none());
        assert_eq!(snap.phone_number.as_deref(), Some("5511999999999"));
    }

    #[tokio::test]
    async fn test_transition_out_of_disconnected_is_rejected() {
        let s = session("s1");
        s.transition(Phase::Disconnected, None).await;

        let applied = s
            .transition(Phase::Connected { identity: "1".into() }, None)
            .await;

        assert!(!applied);
        assert_eq!(s.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_transition_connected_to_qr_required_is_rejected() {
        let s = session("s1");
        s.transition(Phase::Connected { identity: "1".into() }, None)
            .await;

        let applied = s
            .transition(Phase::QrRequired { code: "late".into() }, None)
            .await;

        assert!(!applied);
        assert!(s.snapshot().await.qr_code.is_none());
    }

    #[tokio::test]
    async fn test_transition_wakes_status_watchers() {
        let s = session("s1");
        let mut rx = s.watch_status();

        s.transition(Phase::QrRequired { code: "A".into() }, None).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionStatus::QrRequired);

        // A code refresh keeps the status but still wakes watchers.
        s.transition(Phase::QrRequired { code: "B".into() }, None).await;
        rx.changed().await.unwrap();
        assert_eq!(s.phase().await.pairing_code(), Some("B"));
    }

    #[tokio::test]
    async fn test_transition_delivers_event_to_listeners() {
        let s = session("s1");
        let (conn, mut peer) = channel_pair();
        s.add_listener(Arc::new(conn)).await;

        let event = PushEvent::qr_code(SessionId::from("s1"), "ABC123");
        s.transition(
            Phase::QrRequired { code: "ABC123".into() },
            Some(&event),
        )
        .await;

        let frame = peer.try_recv().expect("event delivered");
        let json: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(json["type"], "qr_code");
        assert_eq!(json["data"]["qrCode"], "ABC123");
    }

    // =====================================================================
    // install_client() / shut_down()
    // =====================================================================

    #[tokio::test]
    async fn test_install_client_after_disconnect_is_refused() {
        let s = session("s1");
        s.transition(Phase::Disconnected, None).await;

        let installed = s
            .install_client(Arc::new(SimClient::standalone("s1")))
            .await;

        assert!(!installed);
        assert!(s.client().await.is_none());
    }

    #[tokio::test]
    async fn test_shut_down_releases_client_and_listeners() {
        let s = session("s1");
        s.install_client(Arc::new(SimClient::standalone("s1"))).await;
        let (conn, mut peer) = channel_pair();
        s.add_listener(Arc::new(conn)).await;

        let released = s.shut_down().await;

        assert!(released.client.is_some());
        assert_eq!(released.listeners.len(), 1);
        assert_eq!(s.listener_count().await, 0);
        assert_eq!(s.status(), SessionStatus::Disconnected);

        let frame = peer.try_recv().expect("disconnect notice");
        let json: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(json["type"], "session_disconnected");
    }

    #[tokio::test]
    async fn test_send_text_requires_connected_phase() {
        let s = session("s1");
        let client = SimClient::standalone("s1");
        client.force_connected(true);
        s.install_client(Arc::new(client.clone())).await;

        let result = s.send_text("5511888888888", "hi").await;
        assert!(matches!(result, Err(SessionError::NotConnected(_))));
        assert_eq!(client.send_calls(), 0);

        s.transition(Phase::Connected { identity: "1".into() }, None)
            .await;
        let (to, _) = s.send_text("5511888888888", "hi").await.unwrap();
        assert_eq!(to.to_string(), "5511888888888@s.whatsapp.net");
        assert_eq!(client.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_is_live_tracks_client_link() {
        let s = session("s1");
        let client = SimClient::standalone("s1");
        client.force_connected(true);
        s.install_client(Arc::new(client.clone())).await;
        assert!(!s.is_live());

        s.transition(Phase::Connected { identity: "1".into() }, None)
            .await;
        assert!(s.is_live());

        client.force_connected(false);
        assert!(!s.is_live());
    }

    #[test]
    fn test_store_dir_joins_session_id() {
        let config = SessionConfig {
            store_root: PathBuf::from("/var/lib/pairline"),
            ..SessionConfig::default()
        };
        assert_eq!(
            config.store_dir(&SessionId::from("s1")),
            PathBuf::from("/var/lib/pairline/s1")
        );
    }
}
