//! Event fan-out: best-effort delivery of push events to listeners.
//!
//! There is no queue and no retry. An event is encoded once and written
//! to each listener in turn; a listener whose write fails is logged and
//! left registered (its own read loop notices the disconnect and
//! unsubscribes it).

use std::sync::Arc;

use pairline_protocol::{Codec, JsonCodec, PushEvent, SessionId};
use pairline_transport::{Connection, ConnectionId};

use crate::{ProtocolClient, Registry};

/// Encodes `event` and writes it to every listener.
pub(crate) async fn deliver<'a, L, I>(
    session: &SessionId,
    listeners: I,
    event: &PushEvent,
) where
    L: Connection,
    I: IntoIterator<Item = &'a Arc<L>>,
{
    let bytes = match JsonCodec.encode(event) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(session_id = %session, error = %e, "failed to encode push event");
            return;
        }
    };

    for listener in listeners {
        if let Err(e) = listener.send(&bytes).await {
            tracing::warn!(
                session_id = %session,
                conn = %listener.id(),
                event = event.kind(),
                error = %e,
                "failed to deliver push event"
            );
        }
    }
}

/// Closes listeners that have already been detached from their session.
pub(crate) async fn close_all<L: Connection>(
    session: &SessionId,
    listeners: Vec<Arc<L>>,
) {
    for listener in listeners {
        if let Err(e) = listener.close().await {
            tracing::debug!(
                session_id = %session,
                conn = %listener.id(),
                error = %e,
                "listener close failed"
            );
        }
    }
}

impl<C: ProtocolClient, L: Connection> Registry<C, L> {
    /// Delivers `event` to every listener of session `id`.
    ///
    /// A missing session is not an error: there is simply nobody to tell.
    pub async fn publish(&self, id: &SessionId, event: &PushEvent) {
        match self.get(id) {
            Ok(session) => session.publish(event).await,
            Err(_) => {
                tracing::debug!(session_id = %id, event = event.kind(), "publish to unknown session dropped");
            }
        }
    }

    /// Attaches a listener. Returns `false` (and attaches nothing) when
    /// the session does not exist.
    pub async fn subscribe(&self, id: &SessionId, listener: Arc<L>) -> bool {
        match self.get(id) {
            Ok(session) => {
                session.add_listener(listener).await;
                true
            }
            Err(_) => false,
        }
    }

    /// Detaches a listener. Unknown sessions and connections are ignored.
    pub async fn unsubscribe(&self, id: &SessionId, conn: ConnectionId) {
        if let Ok(session) = self.get(id) {
            if session.remove_listener(conn).await.is_some() {
                tracing::debug!(session_id = %id, %conn, "listener unsubscribed");
            }
        }
    }
}
