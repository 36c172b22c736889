//! The session manager: the operations the control plane calls.
//!
//! It owns the [`Registry`], the [`Backend`] that builds protocol clients,
//! and the [`SessionConfig`], and it is where a request turns into
//! registry changes plus, for new sessions, a spawned handshake.
//!
//! ## Lifecycle
//!
//! ```text
//! create_session() ──→ [connecting] ──(handshake task)──→ [qr_required]
//!        │                                                    │
//!        │                                                    ▼
//!        │                                               [connected] ──→ send()
//!        ▼
//! disconnect() / timeout ──→ [disconnected] ──→ removed
//! ```

use std::sync::Arc;
use std::time::Duration;

use pairline_protocol::{SessionId, SessionSnapshot, SessionStatus};
use pairline_transport::{Connection, ConnectionId};

use crate::{
    fanout, lifecycle, Backend, ClientError, CreateOutcome, CredentialStore,
    Credentials, Phase, ProtocolClient, Registry, SendReceipt, SessionConfig,
    SessionError,
};

/// Session counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub total: usize,
    pub connected: usize,
}

/// Entry point for every session operation.
///
/// Generic over the backend (`B`) that supplies protocol clients and the
/// listener connection type (`L`), so the same manager runs against a
/// real library with WebSocket listeners in production and against
/// [`sim`](crate::sim) with in-memory listeners in tests.
pub struct SessionManager<B: Backend, L: Connection> {
    backend: B,
    registry: Arc<Registry<B::Client, L>>,
    config: SessionConfig,
}

impl<B: Backend, L: Connection> SessionManager<B, L> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(Registry::new()),
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<Registry<B::Client, L>> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts a session, or reports on the one already running.
    ///
    /// The session is in the registry (as `connecting`) before any store
    /// or network I/O starts, so a status query issued right after this
    /// returns never sees `NotFound`. Pairing continues in a background
    /// task; the returned snapshot is taken before it starts.
    ///
    /// # Errors
    /// - [`SessionError::InvalidInput`]: blank session id
    /// - [`SessionError::Store`]: the credential store or client could
    ///   not be prepared; the session is removed again
    pub async fn create_session(
        &self,
        id: SessionId,
        credentials: Credentials,
    ) -> Result<(SessionSnapshot, CreateOutcome), SessionError> {
        if id.is_blank() {
            return Err(SessionError::InvalidInput(
                "session id must not be empty".into(),
            ));
        }

        let (session, outcome, replaced) =
            self.registry.create_replacing(id.clone(), credentials);
        if outcome != CreateOutcome::Created {
            tracing::info!(session_id = %id, ?outcome, "session already active");
            return Ok((session.snapshot().await, outcome));
        }

        // Listeners that were waiting on a dead session follow its
        // replacement.
        if let Some(old) = replaced {
            let listeners = old.take_listeners().await;
            if !listeners.is_empty() {
                tracing::debug!(
                    session_id = %id,
                    count = listeners.len(),
                    "moving listeners to replacement session"
                );
            }
            session.adopt_listeners(listeners).await;
            if let Some(client) = old.shut_down().await.client {
                client.disconnect().await;
            }
        }

        let client = match self.open_client(&id).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "failed to prepare protocol client");
                let released = session.shut_down().await;
                fanout::close_all(&id, released.listeners).await;
                self.registry.remove_if_same(&session);
                return Err(SessionError::Store(e));
            }
        };

        if !session.install_client(client).await {
            tracing::info!(session_id = %id, "session disconnected before its client was ready");
            return Ok((session.snapshot().await, outcome));
        }

        let snapshot = session.snapshot().await;
        tokio::spawn(lifecycle::run_handshake(
            Arc::clone(&self.registry),
            session,
            self.config.clone(),
        ));
        Ok((snapshot, outcome))
    }

    async fn open_client(&self, id: &SessionId) -> Result<B::Client, ClientError> {
        let store = self.backend.store();
        store.upgrade_schema().await?;
        let device = store.open(id, &self.config.store_dir(id)).await?;
        self.backend.client(device, &self.config)
    }

    /// Returns a session's current snapshot.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub async fn status(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        Ok(self.registry.get(id)?.snapshot().await)
    }

    /// Waits until the session shows a pairing code and returns it.
    ///
    /// Returns immediately if a code is already showing.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: unknown id
    /// - [`SessionError::PairingUnavailable`]: the session is (or becomes)
    ///   `connected` or `disconnected`
    /// - [`SessionError::HandshakeTimeout`]: no code within `timeout`
    pub async fn wait_for_pairing_code(
        &self,
        id: &SessionId,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        let session = self.registry.get(id)?;
        // Subscribe before the first read so no transition slips between.
        let mut status = session.watch_status();
        let poll = self.config.qr_poll_interval;

        let wait = async {
            loop {
                match session.phase().await {
                    Phase::QrRequired { code } => return Ok(code),
                    Phase::Connecting => {}
                    phase @ (Phase::Connected { .. } | Phase::Disconnected) => {
                        return Err(SessionError::PairingUnavailable {
                            session: id.clone(),
                            status: phase.status(),
                        });
                    }
                }
                tokio::select! {
                    _ = status.changed() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| Err(SessionError::HandshakeTimeout(id.clone())))
    }

    /// Tears a session down: listeners are told and closed, the client is
    /// disconnected, and the entry is removed.
    ///
    /// A handshake still running for it is not cancelled; it finds the
    /// session gone and stops.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] for unknown ids.
    pub async fn disconnect(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let session = self.registry.get(id)?;

        let released = session.shut_down().await;
        fanout::close_all(id, released.listeners).await;
        if let Some(client) = released.client {
            client.disconnect().await;
        }
        self.registry.remove_if_same(&session);

        tracing::info!(session_id = %id, "session disconnected");
        Ok(session.snapshot().await)
    }

    /// Sends a text message through a connected session.
    ///
    /// The client is only contacted once the session is known to be
    /// connected and the recipient has parsed. A concurrent
    /// [`disconnect`](Self::disconnect) waits for the send to finish.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: unknown id
    /// - [`SessionError::NotConnected`]: session not `connected`
    /// - [`SessionError::InvalidInput`]: malformed recipient
    /// - [`SessionError::Protocol`]: the client failed the send
    pub async fn send(
        &self,
        id: &SessionId,
        to: &str,
        text: &str,
    ) -> Result<SendReceipt, SessionError> {
        let session = self.registry.get(id)?;
        let (address, receipt) = session.send_text(to, text).await?;

        tracing::info!(
            session_id = %id,
            to = %address,
            message_id = %receipt.message_id,
            "message sent"
        );
        Ok(receipt)
    }

    /// Counts sessions, reading only the lock-free status mirrors.
    pub fn health(&self) -> Health {
        let mut health = Health { total: 0, connected: 0 };
        self.registry.for_each(|session| {
            health.total += 1;
            if session.status() == SessionStatus::Connected {
                health.connected += 1;
            }
        });
        health
    }

    /// Attaches a listener. Returns `false` if the session does not exist.
    pub async fn subscribe(&self, id: &SessionId, listener: Arc<L>) -> bool {
        self.registry.subscribe(id, listener).await
    }

    pub async fn unsubscribe(&self, id: &SessionId, conn: ConnectionId) {
        self.registry.unsubscribe(id, conn).await;
    }

    /// Drains every session. Called once on the way out.
    pub async fn shutdown_all(&self) -> usize {
        self.registry.drain_all().await
    }
}

#[cfg(test)]
mod tests {
    use pairline_transport::ChannelConnection;

    use super::*;
    use crate::sim::SimBackend;

    type TestManager = SessionManager<SimBackend, ChannelConnection>;

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    #[tokio::test]
    async fn test_create_session_blank_id_returns_invalid_input() {
        let mgr = TestManager::new(SimBackend::new(), SessionConfig::default());

        let result = mgr.create_session(sid("  "), Credentials::default()).await;

        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
        assert!(mgr.registry().is_empty());
    }

    #[tokio::test]
    async fn test_create_session_upgrades_schema_before_open() {
        let backend = SimBackend::new();
        let mgr = TestManager::new(backend.clone(), SessionConfig::default());

        mgr.create_session(sid("s1"), Credentials::default())
            .await
            .unwrap();

        assert_eq!(backend.sim_store().schema_upgrades(), 1);
        assert_eq!(backend.sim_store().opens(), 1);
    }

    #[tokio::test]
    async fn test_status_unknown_id_returns_not_found() {
        let mgr = TestManager::new(SimBackend::new(), SessionConfig::default());

        let result = mgr.status(&sid("never-created")).await;

        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_id_returns_not_found() {
        let mgr = TestManager::new(SimBackend::new(), SessionConfig::default());
        assert!(matches!(
            mgr.disconnect(&sid("ghost")).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_counts_empty_registry() {
        let mgr = TestManager::new(SimBackend::new(), SessionConfig::default());
        assert_eq!(mgr.health(), Health { total: 0, connected: 0 });
    }
}
