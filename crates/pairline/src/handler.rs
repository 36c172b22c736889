//! HTTP and WebSocket handlers.
//!
//! Each handler is thin: parse and validate the body, call one
//! [`SessionManager`](pairline_session::SessionManager) operation, and wrap
//! the result in an [`ApiResponse`]. Errors travel as [`PairlineError`],
//! whose `IntoResponse` picks the status code.
//!
//! The push channel (`GET /ws?session=<id>`) attaches the upgraded socket
//! as a listener and then just reads until the peer goes away. Nothing the
//! client sends is interpreted; reading only detects disconnects.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use pairline_protocol::{ApiResponse, QrCodeData, SessionId, SessionSnapshot, SessionStatus};
use pairline_session::{Backend, CreateOutcome, Credentials};
use pairline_transport::{Connection, WebSocketConnection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::PairlineError;

type ApiResult<T> = Result<Json<ApiResponse<T>>, PairlineError>;

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartRequest {
    #[serde(default)]
    session: String,
    #[serde(default)]
    session_key: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionRequest {
    #[serde(default)]
    session: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendTextRequest {
    #[serde(default)]
    session: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    session: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DisconnectData {
    session: SessionId,
    status: SessionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendTextData {
    message_id: String,
    phone: String,
    message: String,
    timestamp: DateTime<Utc>,
    status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthData {
    status: &'static str,
    sessions: usize,
    connected_sessions: usize,
    timestamp: DateTime<Utc>,
}

/// Parses a JSON body. Anything unparseable is a plain 400, whatever
/// serde's complaint was.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, PairlineError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "rejecting request body");
        PairlineError::BadRequest("invalid JSON".into())
    })
}

fn require_session(session: String) -> Result<SessionId, PairlineError> {
    let id = SessionId::new(session.trim());
    if id.is_blank() {
        return Err(PairlineError::BadRequest("session is required".into()));
    }
    Ok(id)
}

// ---------------------------------------------------------------------------
// REST handlers
// ---------------------------------------------------------------------------

/// `POST /start`
pub(crate) async fn start<B: Backend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> ApiResult<SessionSnapshot> {
    let req: StartRequest = parse_body(&body)?;
    if req.session.trim().is_empty()
        || req.session_key.is_empty()
        || req.token.is_empty()
    {
        return Err(PairlineError::BadRequest(
            "session, sessionKey and token are required".into(),
        ));
    }
    let id = require_session(req.session)?;
    let credentials = Credentials {
        credential_key: req.session_key,
        access_token: req.token,
        webhook_url: req.webhook_url.filter(|url| !url.is_empty()),
    };

    let (snapshot, outcome) =
        state.manager.create_session(id, credentials).await?;

    let message = match outcome {
        CreateOutcome::AlreadyConnected => "session already connected",
        CreateOutcome::InProgress => "session start in progress",
        CreateOutcome::Created => "session started",
    };
    Ok(Json(ApiResponse::ok(message, snapshot)))
}

/// `POST /status`
pub(crate) async fn status<B: Backend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> ApiResult<SessionSnapshot> {
    let req: SessionRequest = parse_body(&body)?;
    let id = require_session(req.session)?;

    let snapshot = state.manager.status(&id).await?;
    Ok(Json(ApiResponse::ok("session status", snapshot)))
}

/// `POST /qrcode`: waits (bounded) for a pairing code.
pub(crate) async fn qrcode<B: Backend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> ApiResult<QrCodeData> {
    let req: SessionRequest = parse_body(&body)?;
    let id = require_session(req.session)?;

    let code = state
        .manager
        .wait_for_pairing_code(&id, state.pairing_wait)
        .await?;

    Ok(Json(ApiResponse::ok(
        "QR code ready",
        QrCodeData {
            session: id,
            qr_code: code,
            status: SessionStatus::QrRequired,
        },
    )))
}

/// `POST /disconnect`
pub(crate) async fn disconnect<B: Backend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> ApiResult<DisconnectData> {
    let req: SessionRequest = parse_body(&body)?;
    let id = require_session(req.session)?;

    let snapshot = state.manager.disconnect(&id).await?;
    Ok(Json(ApiResponse::ok(
        "session disconnected",
        DisconnectData {
            session: snapshot.session,
            status: snapshot.status,
        },
    )))
}

/// `POST /send-text`
pub(crate) async fn send_text<B: Backend>(
    State(state): State<AppState<B>>,
    body: Bytes,
) -> ApiResult<SendTextData> {
    let req: SendTextRequest = parse_body(&body)?;
    if req.session.trim().is_empty() || req.phone.trim().is_empty() || req.message.is_empty() {
        return Err(PairlineError::BadRequest(
            "session, phone and message are required".into(),
        ));
    }
    let id = require_session(req.session)?;

    let receipt = state.manager.send(&id, &req.phone, &req.message).await?;

    Ok(Json(ApiResponse::ok(
        "message sent",
        SendTextData {
            message_id: receipt.message_id,
            phone: req.phone,
            message: req.message,
            timestamp: receipt.timestamp,
            status: "sent",
        },
    )))
}

/// `GET /health`
pub(crate) async fn health<B: Backend>(State(state): State<AppState<B>>) -> Json<HealthData> {
    let health = state.manager.health();
    Json(HealthData {
        status: "ok",
        sessions: health.total,
        connected_sessions: health.connected,
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

/// `GET /ws?session=<id>`
///
/// Unknown sessions are refused before the upgrade so the client gets a
/// proper 404 instead of a socket that never says anything.
pub(crate) async fn ws<B: Backend>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<B>>,
    Query(params): Query<WsParams>,
) -> Result<Response, PairlineError> {
    let id = require_session(params.session.unwrap_or_default())?;
    state.manager.status(&id).await?;

    Ok(ws.on_upgrade(move |socket| listen(socket, state, id)))
}

async fn listen<B: Backend>(socket: WebSocket, state: AppState<B>, id: SessionId) {
    let conn = Arc::new(WebSocketConnection::new(socket));
    let conn_id = conn.id();

    // The session may have gone away between the check and the upgrade.
    if !state.manager.subscribe(&id, Arc::clone(&conn)).await {
        tracing::debug!(session_id = %id, %conn_id, "session vanished before subscribe");
        if let Err(e) = conn.close().await {
            tracing::debug!(
                session_id = %id,
                %conn_id,
                error = %e,
                "push channel close failed"
            );
        }
        return;
    }
    tracing::info!(session_id = %id, %conn_id, "push channel opened");

    loop {
        match conn.recv().await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session_id = %id, %conn_id, error = %e, "push channel read failed");
                break;
            }
        }
    }

    state.manager.unsubscribe(&id, conn_id).await;
    tracing::info!(session_id = %id, %conn_id, "push channel closed");
}
