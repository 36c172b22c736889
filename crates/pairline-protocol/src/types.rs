//! Core protocol types for Pairline's control plane.
//!
//! This module defines every type that leaves the process: session
//! snapshots returned by the REST endpoints, push events written to
//! listeners, and the response envelope that wraps both.
//!
//! The JSON field names are camelCase because the dashboard that consumes
//! them is written in TypeScript.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The caller-chosen identifier of a session.
///
/// A newtype over `String` so a session id can't be confused with a phone
/// number or an access token, even though all three are strings.
///
/// `#[serde(transparent)]` keeps the JSON form a plain string:
/// `SessionId("s1")` is `"s1"` on the wire.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is empty (or only whitespace).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// The externally visible status of a session.
///
/// ```text
///   Connecting ──(pairing code)──→ QrRequired ──(pairing success)──→ Connected
///       │                              │  ↺ (code refresh)              │
///       └──────(reconnect / success)───┼────────────────────────────────┘
///                                      ▼
///   any state ──(timeout / disconnect / connect error)──→ Disconnected
/// ```
///
/// Serialized in snake_case (`"qr_required"`), which is what existing
/// dashboards match on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrRequired,
    Connected,
}

impl SessionStatus {
    /// The wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrRequired => "qr_required",
            Self::Connected => "connected",
        }
    }

    /// Returns `true` while the session is handshaking or connected,
    /// i.e. anything except `Disconnected`.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Returns `true` if moving from `self` to `target` is a legal
    /// transition of the session state machine.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionStatus::*;
        matches!(
            (self, target),
            (_, Disconnected)
                | (Connecting, QrRequired)
                | (Connecting, Connected)
                | (QrRequired, QrRequired)
                | (QrRequired, Connected)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// A point-in-time copy of a session's public fields.
///
/// Snapshots are taken under the session's lock and then handed out, so a
/// caller never holds a lock while serializing a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub status: SessionStatus,
    /// Present only while `status` is `qr_required`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    /// Present only while `status` is `connected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PushEvent: what listeners receive
// ---------------------------------------------------------------------------

/// Payload of a [`PushEvent::QrCode`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeData {
    pub session: SessionId,
    pub qr_code: String,
    pub status: SessionStatus,
}

/// Payload of the connection state events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub session: SessionId,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Payload of a [`PushEvent::MessageReceived`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_id: String,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// An asynchronous event pushed to every listener of a session.
///
/// `#[serde(tag = "type", content = "data")]` produces adjacently tagged
/// JSON:
///
/// ```text
/// { "type": "qr_code", "data": { "session": "s1", "qrCode": "...", "status": "qr_required" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// A new (or refreshed) pairing code is ready to be scanned.
    QrCode(QrCodeData),
    /// The session finished pairing or the client re-established its link.
    SessionConnected(ConnectionData),
    /// The session lost its connection or was torn down.
    SessionDisconnected(ConnectionData),
    /// A message arrived from the messaging network.
    MessageReceived(InboundMessage),
}

impl PushEvent {
    /// Placeholder content for inbound messages without a text body.
    pub const UNSUPPORTED_CONTENT: &'static str = "[unsupported message]";

    /// Builds a `qr_code` event.
    pub fn qr_code(session: SessionId, code: impl Into<String>) -> Self {
        Self::QrCode(QrCodeData {
            session,
            qr_code: code.into(),
            status: SessionStatus::QrRequired,
        })
    }

    /// Builds a `session_connected` event.
    pub fn connected(session: SessionId, phone_number: Option<String>) -> Self {
        Self::SessionConnected(ConnectionData {
            session,
            status: SessionStatus::Connected,
            phone_number,
        })
    }

    /// Builds a `session_disconnected` event.
    pub fn disconnected(session: SessionId) -> Self {
        Self::SessionDisconnected(ConnectionData {
            session,
            status: SessionStatus::Disconnected,
            phone_number: None,
        })
    }

    /// Builds a `message_received` event. Empty text is replaced with
    /// [`Self::UNSUPPORTED_CONTENT`] so listeners always get a body.
    pub fn message_received(
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        sender: impl Into<String>,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content = if text.is_empty() {
            Self::UNSUPPORTED_CONTENT.to_string()
        } else {
            text.to_string()
        };
        Self::MessageReceived(InboundMessage {
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            content,
            sender: sender.into(),
            timestamp,
        })
    }

    /// The wire tag of this event (`"qr_code"`, ...). Handy for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QrCode(_) => "qr_code",
            Self::SessionConnected(_) => "session_connected",
            Self::SessionDisconnected(_) => "session_disconnected",
            Self::MessageReceived(_) => "message_received",
        }
    }
}

// ---------------------------------------------------------------------------
// ApiResponse: the REST envelope
// ---------------------------------------------------------------------------

/// The envelope every REST response is wrapped in.
///
/// Success: `{ "success": true, "message": "...", "data": {...} }`
/// Failure: `{ "success": false, "message": "...", "error": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// A successful response carrying `data`.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    /// A failed response. The message doubles as the error string.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            data: None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
