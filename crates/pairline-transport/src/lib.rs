//! Listener transport abstraction for Pairline.
//!
//! A listener is any bidirectional channel that wants a session's push
//! events. The session layer writes serialized events to it and reads from
//! it only to notice when it goes away. [`Connection`] captures exactly
//! that contract so the core can be tested without a network.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WebSocketConnection`] over an upgraded
//!   `axum` WebSocket
//!
//! The in-memory [`ChannelConnection`] is always available.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{channel_pair, ChannelConnection, ChannelPeer};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one listener within a session's listener set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One push listener.
///
/// Futures are declared `Send` so listeners can be driven from spawned
/// tasks that are generic over the connection type.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes one frame. Text-safe payloads should go out as text.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Waits for the next inbound frame; `Ok(None)` once the peer is gone.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the listener. Later sends fail.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn id(&self) -> ConnectionId;
}
