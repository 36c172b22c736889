//! Unified error type for Pairline, and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pairline_protocol::{ApiResponse, ProtocolError};
use pairline_session::SessionError;
use pairline_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each wrapped variant generates the `From`
/// impl, so `?` lifts a sub-crate error straight into this type, and from
/// there into an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum PairlineError {
    /// A listener transport error (send, recv, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A wire-level error (encode, decode, address).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (not found, not connected, timeout, ...).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Startup configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Binding or serving failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was malformed before reaching the session layer.
    #[error("{0}")]
    BadRequest(String),
}

impl PairlineError {
    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Session(e) => match e {
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::InvalidInput(_)
                | SessionError::NotConnected(_)
                | SessionError::PairingUnavailable { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::HandshakeTimeout(_) => StatusCode::REQUEST_TIMEOUT,
                SessionError::Protocol(_) | SessionError::Store(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Protocol(ProtocolError::InvalidAddress(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Protocol(_) | Self::Transport(_) | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PairlineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        let body = ApiResponse::<()>::failure(self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pairline_protocol::{SessionId, SessionStatus};
    use pairline_session::ClientError;

    use super::*;

    fn sid() -> SessionId {
        SessionId::from("s1")
    }

    #[test]
    fn test_from_session_error() {
        let err: PairlineError = SessionError::NotFound(sid()).into();
        assert!(matches!(err, PairlineError::Session(_)));
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn test_from_transport_error() {
        let err: PairlineError =
            TransportError::Closed("gone".into()).into();
        assert!(matches!(err, PairlineError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_status_code_mapping() {
        let cases: Vec<(PairlineError, StatusCode)> = vec![
            (SessionError::NotFound(sid()).into(), StatusCode::NOT_FOUND),
            (
                SessionError::InvalidInput("bad".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (SessionError::NotConnected(sid()).into(), StatusCode::BAD_REQUEST),
            (
                SessionError::PairingUnavailable {
                    session: sid(),
                    status: SessionStatus::Connected,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                SessionError::HandshakeTimeout(sid()).into(),
                StatusCode::REQUEST_TIMEOUT,
            ),
            (
                SessionError::Store(ClientError::Store("disk".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SessionError::Protocol(ClientError::NotConnected).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ProtocolError::InvalidAddress("x".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                PairlineError::BadRequest("invalid JSON".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn test_into_response_uses_mapped_status() {
        let response =
            PairlineError::from(SessionError::NotFound(sid())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
