//! Seams to the external messaging library.
//!
//! Pairline does not speak the messaging network's protocol. It drives an
//! opaque client through these traits:
//!
//! - [`ProtocolClient`]: one connection to the network
//! - [`CredentialStore`]: where paired device identities live
//! - [`Backend`]: pairs a store with a way to build clients from it
//!
//! Production code plugs a real library in here; tests and the loopback
//! demo use [`sim`](crate::sim).

use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use pairline_protocol::{Address, SessionId};
use tokio::sync::mpsc;

use crate::{ClientError, SessionConfig};

/// Everything the client can tell us asynchronously.
///
/// The set is closed: the lifecycle controller handles each variant
/// explicitly, so adding one is a compile error until it is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A scannable pairing code. May repeat as the code rotates.
    PairingCode { code: String },

    /// Pairing finished; `identity` is the linked account (a phone number).
    PairingSuccess { identity: String },

    /// The connection came (back) up.
    Connected,

    /// The connection dropped without us asking.
    Disconnected,

    /// An inbound message. `text` is empty for non-text content.
    MessageReceived {
        id: String,
        chat: String,
        sender: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
}

/// What a successful send returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One connection to the messaging network.
///
/// Methods return `Send` futures (rather than using `async fn`) because
/// the lifecycle controller drives clients from spawned tasks that are
/// generic over the client type.
pub trait ProtocolClient: Send + Sync + 'static {
    /// Opens the connection. For an unpaired device this starts pairing;
    /// codes then arrive on the event stream.
    fn connect(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Closes the connection. Never fails from the caller's perspective.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Sends a text message.
    fn send_text(
        &self,
        to: &Address,
        text: &str,
    ) -> impl Future<Output = Result<SendReceipt, ClientError>> + Send;

    /// Opens a new receiver for the client's event stream. Events emitted
    /// before the call are not replayed.
    fn subscribe_events(&self) -> mpsc::Receiver<ClientEvent>;

    /// Whether the underlying device is already paired.
    fn has_stored_identity(&self) -> bool;

    /// The paired identity, if any.
    fn identity(&self) -> Option<String>;
}

/// Keyed storage for device credentials.
pub trait CredentialStore: Send + Sync + 'static {
    /// Opaque per-session device handle used to build a client.
    type Device: Send + 'static;

    /// Brings the storage schema up to date. Called before every `open`.
    fn upgrade_schema(
        &self,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Opens (or creates) the device for a session, kept under `dir`.
    fn open(
        &self,
        session: &SessionId,
        dir: &Path,
    ) -> impl Future<Output = Result<Self::Device, ClientError>> + Send;
}

/// A credential store plus a client constructor.
pub trait Backend: Send + Sync + 'static {
    type Store: CredentialStore;
    type Client: ProtocolClient;

    fn store(&self) -> &Self::Store;

    /// Builds a client around an opened device.
    fn client(
        &self,
        device: <Self::Store as CredentialStore>::Device,
        config: &SessionConfig,
    ) -> Result<Self::Client, ClientError>;
}
