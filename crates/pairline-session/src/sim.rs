//! An in-memory stand-in for a real messaging backend.
//!
//! [`SimBackend`] plugs into [`SessionManager`](crate::SessionManager)
//! exactly like a real library would. Every [`SimClient`] it builds is
//! recorded, so a test can grab the client for a session and script it:
//! emit a pairing code, complete pairing, drop the connection, deliver a
//! message. Failure switches make connects or the credential store fail.
//!
//! With [`SimBackend::with_auto_pair`] clients pair themselves: a random
//! code on connect, then success after a delay. The loopback demo runs
//! that way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use pairline_protocol::{Address, SessionId};
use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::mpsc;

use crate::{
    Backend, ClientError, ClientEvent, CredentialStore, ProtocolClient,
    SendReceipt, SessionConfig,
};

const PAIRING_CODE_LEN: usize = 32;
const DEFAULT_EVENT_BUFFER: usize = 64;

/// A random alphanumeric pairing code.
pub fn random_pairing_code() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PAIRING_CODE_LEN)
        .map(char::from)
        .collect()
}

fn random_phone_number() -> String {
    let subscriber: u64 = rand::rng().random_range(10_000_000_000..100_000_000_000);
    format!("55{subscriber}")
}

fn random_message_id() -> String {
    format!("3EB0{:016X}", rand::rng().random::<u64>())
}

// ---------------------------------------------------------------------------
// SimStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreShared {
    identities: Mutex<HashMap<SessionId, String>>,
    schema_upgrades: AtomicUsize,
    opens: AtomicUsize,
    opened_dirs: Mutex<Vec<PathBuf>>,
    fail: AtomicBool,
}

/// In-memory credential store: remembers which sessions have paired.
#[derive(Clone, Default)]
pub struct SimStore {
    shared: Arc<StoreShared>,
}

/// Device handle produced by [`SimStore::open`].
#[derive(Debug)]
pub struct SimDevice {
    session: SessionId,
    identity: Option<String>,
}

impl SimStore {
    pub fn schema_upgrades(&self) -> usize {
        self.shared.schema_upgrades.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// The store directories passed to `open`, oldest first.
    pub fn opened_dirs(&self) -> Vec<PathBuf> {
        self.shared.opened_dirs.lock().clone()
    }

    /// The identity recorded for a session by a completed pairing.
    pub fn stored_identity(&self, session: &SessionId) -> Option<String> {
        self.shared.identities.lock().get(session).cloned()
    }
}

impl CredentialStore for SimStore {
    type Device = SimDevice;

    async fn upgrade_schema(&self) -> Result<(), ClientError> {
        if self.shared.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Store("simulated schema failure".into()));
        }
        self.shared.schema_upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&self, session: &SessionId, dir: &Path) -> Result<SimDevice, ClientError> {
        if self.shared.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Store("simulated open failure".into()));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.opened_dirs.lock().push(dir.to_path_buf());
        Ok(SimDevice {
            session: session.clone(),
            identity: self.stored_identity(session),
        })
    }
}

// ---------------------------------------------------------------------------
// SimClient
// ---------------------------------------------------------------------------

struct ClientInner {
    session: SessionId,
    identity: Mutex<Option<String>>,
    store: Option<Arc<StoreShared>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    auto_pair: Option<Duration>,
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<ClientEvent>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    send_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<(Address, String)>>,
}

/// A scriptable protocol client. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimClient {
    inner: Arc<ClientInner>,
}

impl SimClient {
    fn build(
        session: SessionId,
        identity: Option<String>,
        store: Option<Arc<StoreShared>>,
        capacity: usize,
        fail_connect: bool,
        auto_pair: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                session,
                identity: Mutex::new(identity),
                store,
                connected: AtomicBool::new(false),
                fail_connect: AtomicBool::new(fail_connect),
                auto_pair,
                capacity,
                subscribers: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                send_delay: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// An unpaired client not attached to any store.
    pub fn standalone(session: &str) -> Self {
        Self::build(
            SessionId::from(session),
            None,
            None,
            DEFAULT_EVENT_BUFFER,
            false,
            None,
        )
    }

    /// A client whose device is already paired as `identity`.
    pub fn paired(session: &str, identity: &str) -> Self {
        Self::build(
            SessionId::from(session),
            Some(identity.to_string()),
            None,
            DEFAULT_EVENT_BUFFER,
            false,
            None,
        )
    }

    pub fn session(&self) -> &SessionId {
        &self.inner.session
    }

    /// Pushes an event to every subscriber, updating the client's own
    /// state the way a real library would.
    pub async fn emit(&self, event: ClientEvent) {
        match &event {
            ClientEvent::PairingSuccess { identity } => {
                *self.inner.identity.lock() = Some(identity.clone());
                self.inner.connected.store(true, Ordering::SeqCst);
                if let Some(store) = &self.inner.store {
                    store
                        .identities
                        .lock()
                        .insert(self.inner.session.clone(), identity.clone());
                }
            }
            ClientEvent::Connected => {
                self.inner.connected.store(true, Ordering::SeqCst);
            }
            ClientEvent::Disconnected => {
                self.inner.connected.store(false, Ordering::SeqCst);
            }
            ClientEvent::PairingCode { .. }
            | ClientEvent::MessageReceived { .. } => {}
        }

        let subscribers: Vec<_> = {
            let mut subs = self.inner.subscribers.lock();
            subs.retain(|tx| !tx.is_closed());
            subs.clone()
        };
        for tx in subscribers {
            // A receiver that went away in between is simply skipped.
            let _ = tx.send(event.clone()).await;
        }
    }

    pub async fn emit_pairing_code(&self, code: &str) {
        self.emit(ClientEvent::PairingCode { code: code.to_string() })
            .await;
    }

    pub async fn emit_pairing_success(&self, identity: &str) {
        self.emit(ClientEvent::PairingSuccess {
            identity: identity.to_string(),
        })
        .await;
    }

    /// Delivers an inbound text message from `sender`.
    pub async fn emit_message(&self, sender: &str, text: &str) {
        self.emit(ClientEvent::MessageReceived {
            id: random_message_id(),
            chat: sender.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub fn fail_connects(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Sets the link state directly, bypassing `connect`.
    pub fn force_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Makes every later `send_text` take `delay` before it lands.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.inner.send_delay.lock() = Some(delay);
    }

    pub fn send_calls(&self) -> usize {
        self.inner.sent.lock().len()
    }

    /// Every message sent so far, as (recipient, text).
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.inner
            .sent
            .lock()
            .iter()
            .map(|(to, text)| (to.to_string(), text.clone()))
            .collect()
    }

    fn spawn_auto_pair(&self, delay: Duration) {
        let client = self.clone();
        tokio::spawn(async move {
            let code = random_pairing_code();
            tracing::info!(session_id = %client.session(), %code, "simulated pairing code");
            client.emit_pairing_code(&code).await;
            tokio::time::sleep(delay).await;
            if client.is_connected() {
                client.emit_pairing_success(&random_phone_number()).await;
            }
        });
    }
}

impl ProtocolClient for SimClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Connect("simulated connect failure".into()));
        }
        self.inner.connected.store(true, Ordering::SeqCst);

        if let Some(delay) = self.inner.auto_pair {
            if !self.has_stored_identity() {
                self.spawn_auto_pair(delay);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        // Ends every event stream handed out so far.
        self.inner.subscribers.lock().clear();
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn send_text(
        &self,
        to: &Address,
        text: &str,
    ) -> Result<SendReceipt, ClientError> {
        let delay = *self.inner.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.inner.sent.lock().push((to.clone(), text.to_string()));
        Ok(SendReceipt {
            message_id: random_message_id(),
            timestamp: Utc::now(),
        })
    }

    fn subscribe_events(&self) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.lock().push(tx);
        rx
    }

    fn has_stored_identity(&self) -> bool {
        self.inner.identity.lock().is_some()
    }

    fn identity(&self) -> Option<String> {
        self.inner.identity.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// SimBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendInner {
    store: SimStore,
    clients: Mutex<Vec<SimClient>>,
    fail_connect: AtomicBool,
    auto_pair: Option<Duration>,
}

/// A [`Backend`] made of a [`SimStore`] and [`SimClient`]s.
#[derive(Clone, Default)]
pub struct SimBackend {
    inner: Arc<BackendInner>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clients pair on their own: a code right after `connect`, success
    /// `delay` later.
    pub fn with_auto_pair(delay: Duration) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                auto_pair: Some(delay),
                ..BackendInner::default()
            }),
        }
    }

    /// Seeds the store as if `session` had paired before.
    pub fn with_stored_identity(self, session: &str, identity: &str) -> Self {
        self.inner
            .store
            .shared
            .identities
            .lock()
            .insert(SessionId::from(session), identity.to_string());
        self
    }

    /// Makes clients built from now on fail `connect`.
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes the store fail schema upgrades and opens.
    pub fn set_fail_store(&self, fail: bool) {
        self.inner.store.shared.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sim_store(&self) -> &SimStore {
        &self.inner.store
    }

    pub fn clients_created(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// The most recently built client for `session`.
    pub fn client_for(&self, session: &SessionId) -> Option<SimClient> {
        self.inner
            .clients
            .lock()
            .iter()
            .rev()
            .find(|c| c.session() == session)
            .cloned()
    }
}

impl Backend for SimBackend {
    type Store = SimStore;
    type Client = SimClient;

    fn store(&self) -> &SimStore {
        &self.inner.store
    }

    fn client(
        &self,
        device: SimDevice,
        config: &SessionConfig,
    ) -> Result<SimClient, ClientError> {
        let client = SimClient::build(
            device.session,
            device.identity,
            Some(Arc::clone(&self.inner.store.shared)),
            config.event_buffer,
            self.inner.fail_connect.load(Ordering::SeqCst),
            self.inner.auto_pair,
        );
        self.inner.clients.lock().push(client.clone());
        Ok(client)
    }
}
