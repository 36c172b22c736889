//! Error types for the session layer.

use pairline_protocol::{SessionId, SessionStatus};

/// Errors returned by session operations.
///
/// Lifecycle failures (a connect that errors, a handshake that times out)
/// never surface here: they become state transitions. These variants are
/// what request-style operations hand back to their caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session is registered under this id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The request itself is malformed (blank id, bad address, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The session exists but cannot send: it is not `connected` or its
    /// client has dropped.
    #[error("session {0} is not connected")]
    NotConnected(SessionId),

    /// A pairing code was requested from a session that is past pairing
    /// (`connected`) or has given up (`disconnected`).
    #[error("session {session} is {status}, no pairing code available")]
    PairingUnavailable {
        session: SessionId,
        status: SessionStatus,
    },

    /// Waiting for a pairing result exceeded its deadline.
    #[error("timed out waiting for pairing on session {0}")]
    HandshakeTimeout(SessionId),

    /// The external protocol client rejected an operation.
    #[error("protocol client error: {0}")]
    Protocol(#[source] ClientError),

    /// The credential store could not be prepared or opened.
    #[error("credential store error: {0}")]
    Store(#[source] ClientError),
}

/// Errors reported by a [`ProtocolClient`](crate::ProtocolClient) or a
/// [`CredentialStore`](crate::CredentialStore) implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The client has no live connection.
    #[error("client is not connected")]
    NotConnected,

    /// The network rejected or failed to deliver a message.
    #[error("send failed: {0}")]
    Send(String),

    /// Credential or device storage failed.
    #[error("store failure: {0}")]
    Store(String),
}
