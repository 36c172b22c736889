//! The session registry: the single source of truth for which sessions
//! exist.
//!
//! # Concurrency note
//!
//! The map sits behind a `parking_lot::RwLock`, which is synchronous.
//! That is deliberate: a synchronous guard cannot be held across an
//! `.await`, so the compiler enforces "never hold the registry lock during
//! I/O or while waiting on a session's lock". Status checks inside the
//! critical section read each session's lock-free status mirror.

use std::collections::HashMap;
use std::sync::Arc;

use pairline_protocol::{SessionId, SessionStatus};
use pairline_transport::Connection;
use parking_lot::RwLock;

use crate::{fanout, Credentials, ProtocolClient, Session, SessionError};

/// What `create` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new session was inserted in `connecting`.
    Created,
    /// The existing session is `connected` with a live link; returned
    /// unchanged.
    AlreadyConnected,
    /// The existing session is still handshaking (`connecting` or
    /// `qr_required`); returned unchanged.
    InProgress,
}

/// Concurrent map of session id → session.
///
/// ## Lifecycle of an entry
///
/// ```text
/// create() ──→ [connecting] ──→ ... ──→ remove()   (timeout / disconnect)
///                  │
///                  └──→ [disconnected] ──→ create() replaces it
/// ```
pub struct Registry<C, L> {
    sessions: RwLock<HashMap<SessionId, Arc<Session<C, L>>>>,
}

impl<C: ProtocolClient, L: Connection> Registry<C, L> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically checks for an active session and inserts a new one if
    /// there is none.
    ///
    /// An existing session that is `connecting` or `qr_required`, or
    /// `connected` with a client whose link is still up, is returned as-is,
    /// so at most one handshake ever runs per id. A `disconnected` one, or
    /// a `connected` one whose link dropped without telling us, is
    /// replaced.
    pub fn create(
        &self,
        id: SessionId,
        credentials: Credentials,
    ) -> (Arc<Session<C, L>>, CreateOutcome) {
        let (session, outcome, _) = self.create_replacing(id, credentials);
        (session, outcome)
    }

    /// Like [`create`](Self::create), also returning the session that was
    /// replaced, if any, so its listeners can be moved and its client
    /// released.
    pub(crate) fn create_replacing(
        &self,
        id: SessionId,
        credentials: Credentials,
    ) -> (Arc<Session<C, L>>, CreateOutcome, Option<Arc<Session<C, L>>>) {
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(&id) {
            let outcome = match existing.status() {
                SessionStatus::Connected if existing.is_live() => {
                    Some(CreateOutcome::AlreadyConnected)
                }
                SessionStatus::Connected => {
                    tracing::warn!(session_id = %id, "connected session lost its link; replacing");
                    None
                }
                SessionStatus::Connecting | SessionStatus::QrRequired => {
                    Some(CreateOutcome::InProgress)
                }
                SessionStatus::Disconnected => None,
            };
            if let Some(outcome) = outcome {
                return (Arc::clone(existing), outcome, None);
            }
        }

        let session = Arc::new(Session::new(id.clone(), credentials));
        let replaced = sessions.insert(id, Arc::clone(&session));
        drop(sessions);

        tracing::info!(
            session_id = %session.id(),
            replaced = replaced.is_some(),
            "session created"
        );
        (session, CreateOutcome::Created, replaced)
    }

    /// Looks up a session.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if no session has this id.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session<C, L>>, SessionError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Unconditionally removes an entry. Callers tear the session down
    /// first.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session<C, L>>> {
        self.sessions.write().remove(id)
    }

    /// Removes the entry for `session`'s id only if it is still this exact
    /// session, not a replacement created since.
    pub(crate) fn remove_if_same(&self, session: &Arc<Session<C, L>>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(session.id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.id());
                true
            }
            _ => false,
        }
    }

    /// Whether `session` is still the registry's entry for its id.
    pub fn is_current(&self, session: &Arc<Session<C, L>>) -> bool {
        self.sessions
            .read()
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// A snapshot of every session. The lock is released before return.
    pub fn sessions(&self) -> Vec<Arc<Session<C, L>>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Calls `f` for each session in a snapshot taken under the lock; `f`
    /// itself runs with the lock released.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session<C, L>>)) {
        for session in self.sessions() {
            f(&session);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Empties the registry, disconnecting every client and closing every
    /// listener. Returns how many sessions were drained.
    pub async fn drain_all(&self) -> usize {
        let drained: Vec<_> =
            self.sessions.write().drain().map(|(_, s)| s).collect();

        for session in &drained {
            let released = session.shut_down().await;
            fanout::close_all(session.id(), released.listeners).await;
            if let Some(client) = released.client {
                client.disconnect().await;
            }
        }

        tracing::info!(count = drained.len(), "registry drained");
        drained.len()
    }
}

impl<C: ProtocolClient, L: Connection> Default for Registry<C, L> {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `Registry`.
    //!
    //! Naming convention: `test_{function}_{scenario}_{expected}`.

    use pairline_transport::{channel_pair, ChannelConnection};

    use super::*;
    use crate::sim::SimClient;
    use crate::Phase;

    type TestRegistry = Registry<SimClient, ChannelConnection>;

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    fn creds() -> Credentials {
        Credentials {
            credential_key: "key".into(),
            access_token: "token".into(),
            webhook_url: None,
        }
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[test]
    fn test_create_new_id_inserts_connecting_session() {
        let registry = TestRegistry::new();

        let (session, outcome) = registry.create(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::Created);
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(registry.contains(&sid("s1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_while_connecting_returns_same_session_in_progress() {
        let registry = TestRegistry::new();
        let (first, _) = registry.create(sid("s1"), creds());

        let (second, outcome) = registry.create(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::InProgress);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_create_while_qr_required_returns_in_progress() {
        let registry = TestRegistry::new();
        let (first, _) = registry.create(sid("s1"), creds());
        first
            .transition(Phase::QrRequired { code: "A".into() }, None)
            .await;

        let (_, outcome) = registry.create(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::InProgress);
    }

    async fn connected(registry: &TestRegistry, id: &str) -> (Arc<Session<SimClient, ChannelConnection>>, SimClient) {
        let (session, _) = registry.create(sid(id), creds());
        let client = SimClient::standalone(id);
        client.force_connected(true);
        session.install_client(Arc::new(client.clone())).await;
        session
            .transition(Phase::Connected { identity: "55".into() }, None)
            .await;
        (session, client)
    }

    #[tokio::test]
    async fn test_create_while_connected_returns_already_connected() {
        let registry = TestRegistry::new();
        let (first, _client) = connected(&registry, "s1").await;

        let (second, outcome) = registry.create(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::AlreadyConnected);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_create_while_connected_with_dead_link_replaces_session() {
        let registry = TestRegistry::new();
        let (old, client) = connected(&registry, "s1").await;
        client.force_connected(false);

        let (new, outcome, replaced) =
            registry.create_replacing(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::Created);
        assert!(Arc::ptr_eq(&replaced.unwrap(), &old));
        assert!(registry.is_current(&new));
        assert_eq!(new.status(), SessionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_create_over_disconnected_replaces_session() {
        let registry = TestRegistry::new();
        let (old, _) = registry.create(sid("s1"), creds());
        old.transition(Phase::Disconnected, None).await;

        let (new, outcome, replaced) =
            registry.create_replacing(sid("s1"), creds());

        assert_eq!(outcome, CreateOutcome::Created);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(Arc::ptr_eq(&replaced.unwrap(), &old));
        assert!(registry.is_current(&new));
        assert!(!registry.is_current(&old));
    }

    #[test]
    fn test_create_concurrent_same_id_inserts_exactly_once() {
        let registry = TestRegistry::new();

        let outcomes: Vec<CreateOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.create(sid("s1"), creds()).1))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created = outcomes
            .iter()
            .filter(|o| **o == CreateOutcome::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    // =====================================================================
    // get() / remove()
    // =====================================================================

    #[test]
    fn test_get_unknown_id_returns_not_found() {
        let registry = TestRegistry::new();

        let result = registry.get(&sid("nope"));

        assert!(matches!(result, Err(SessionError::NotFound(id)) if id.as_str() == "nope"));
    }

    #[test]
    fn test_remove_deletes_entry() {
        let registry = TestRegistry::new();
        registry.create(sid("s1"), creds());

        assert!(registry.remove(&sid("s1")).is_some());
        assert!(registry.get(&sid("s1")).is_err());
        assert!(registry.remove(&sid("s1")).is_none());
    }

    #[tokio::test]
    async fn test_remove_if_same_keeps_replacement() {
        let registry = TestRegistry::new();
        let (old, _) = registry.create(sid("s1"), creds());
        old.transition(Phase::Disconnected, None).await;
        let (new, _) = registry.create(sid("s1"), creds());

        assert!(!registry.remove_if_same(&old));
        assert!(registry.is_current(&new));
        assert!(registry.remove_if_same(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_visits_every_session() {
        let registry = TestRegistry::new();
        registry.create(sid("a"), creds());
        registry.create(sid("b"), creds());

        let mut seen = Vec::new();
        registry.for_each(|s| seen.push(s.id().to_string()));
        seen.sort();

        assert_eq!(seen, vec!["a", "b"]);
    }

    // =====================================================================
    // drain_all()
    // =====================================================================

    #[tokio::test]
    async fn test_drain_all_disconnects_clients_and_closes_listeners() {
        let registry = TestRegistry::new();
        let (session, _) = registry.create(sid("s1"), creds());
        let client = SimClient::standalone("s1");
        session.install_client(Arc::new(client.clone())).await;
        let (conn, peer) = channel_pair();
        registry.subscribe(&sid("s1"), Arc::new(conn)).await;

        let drained = registry.drain_all().await;

        assert_eq!(drained, 1);
        assert!(registry.is_empty());
        assert_eq!(client.disconnect_calls(), 1);
        assert!(peer.is_closed());
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }
}
