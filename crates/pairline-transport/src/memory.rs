//! In-memory connection backed by unbounded channels.
//!
//! Used wherever a real socket would be overkill: unit tests of the
//! fan-out, and embedding Pairline inside another process that wants push
//! events without going through a WebSocket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, TransportError};

/// The server-side half of an in-memory connection.
pub struct ChannelConnection {
    id: ConnectionId,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

/// The remote half: what a subscriber holds.
pub struct ChannelPeer {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

/// Creates a connected (server, peer) pair.
pub fn channel_pair() -> (ChannelConnection, ChannelPeer) {
    let (to_peer, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_peer) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let conn = ChannelConnection {
        id: ConnectionId::next(),
        outbound: Mutex::new(Some(to_peer)),
        inbound: Mutex::new(from_peer),
        closed: Arc::clone(&closed),
    };
    let peer = ChannelPeer {
        incoming,
        outgoing: Some(outgoing),
        closed,
    };
    (conn, peer)
}

impl Connection for ChannelConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or_else(|| {
            TransportError::Closed(format!("{} closed", self.id))
        })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::Closed(format!("{} peer dropped", self.id))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender lets the peer drain what was already sent
        // and then observe end-of-stream.
        self.outbound.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

impl ChannelPeer {
    /// Waits for the next frame. `None` once the server side closed and
    /// every queued frame has been read.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.incoming.recv().await
    }

    /// Returns a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.incoming.try_recv().ok()
    }

    /// Sends a frame to the server side (keep-alive input).
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.outgoing.as_ref().ok_or_else(|| {
            TransportError::Closed("peer hung up".into())
        })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::Closed("server side dropped".into())
        })
    }

    /// Hangs up: the server side's `recv` returns `Ok(None)`.
    pub fn hang_up(&mut self) {
        self.outgoing = None;
    }

    /// Returns `true` once the server side called `close`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_delivers_both_ways() {
        let (conn, mut peer) = channel_pair();

        conn.send(b"to peer").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"to peer");

        peer.send(b"to server").unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap(), b"to server");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_stream() {
        let (conn, mut peer) = channel_pair();
        conn.send(b"last").await.unwrap();
        conn.close().await.unwrap();

        assert!(peer.is_closed());
        assert_eq!(peer.recv().await.unwrap(), b"last");
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, _peer) = channel_pair();
        conn.close().await.unwrap();
        let result = conn.send(b"late").await;
        assert!(matches!(result, Err(TransportError::Closed(_))));
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_fails() {
        let (conn, peer) = channel_pair();
        drop(peer);
        assert!(conn.send(b"anyone?").await.is_err());
    }

    #[tokio::test]
    async fn test_peer_hang_up_ends_server_recv() {
        let (conn, mut peer) = channel_pair();
        peer.hang_up();
        assert!(conn.recv().await.unwrap().is_none());
    }
}
