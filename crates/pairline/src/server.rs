//! `PairlineServer` builder, router and serve loop.
//!
//! Ties the layers together: HTTP/WebSocket transport on the outside, the
//! session manager in the middle, a [`Backend`] underneath.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use pairline_session::{Backend, SessionManager};
use pairline_transport::WebSocketConnection;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{PairlineError, ServerConfig};

/// The manager type every handler works against: sessions whose push
/// listeners are WebSocket connections.
pub type Manager<B> = SessionManager<B, WebSocketConnection>;

/// Shared state handed to each request handler.
pub struct AppState<B: Backend> {
    pub(crate) manager: Arc<Manager<B>>,
    pub(crate) pairing_wait: Duration,
}

impl<B: Backend> AppState<B> {
    pub fn new(manager: Arc<Manager<B>>, pairing_wait: Duration) -> Self {
        Self { manager, pairing_wait }
    }

    pub fn manager(&self) -> &Arc<Manager<B>> {
        &self.manager
    }
}

// Derived Clone would demand `B: Clone`.
impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            pairing_wait: self.pairing_wait,
        }
    }
}

/// Builds the HTTP router. Exposed so tests can drive it without a socket.
pub fn build_router<B: Backend>(state: AppState<B>) -> Router {
    use crate::handler;

    Router::new()
        .route("/start", post(handler::start::<B>))
        .route("/status", post(handler::status::<B>))
        .route("/qrcode", post(handler::qrcode::<B>))
        .route("/disconnect", post(handler::disconnect::<B>))
        .route("/send-text", post(handler::send_text::<B>))
        .route("/health", get(handler::health::<B>))
        .route("/ws", get(handler::ws::<B>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builder for configuring and starting a Pairline server.
///
/// # Example
///
/// ```rust,ignore
/// use pairline::prelude::*;
///
/// let server = PairlineServer::builder()
///     .config(ServerConfig::from_env()?)
///     .build(backend)
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Default)]
pub struct PairlineServerBuilder {
    config: ServerConfig,
}

impl PairlineServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides just the bind address.
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config = self.config.host(host).port(port);
        self
    }

    /// Binds the listener and wires the session manager to `backend`.
    ///
    /// # Errors
    /// Returns [`PairlineError::Io`] if the address cannot be bound.
    pub async fn build<B: Backend>(self, backend: B) -> Result<PairlineServer<B>, PairlineError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let manager = Arc::new(SessionManager::new(
            backend,
            self.config.session_config(),
        ));

        tracing::debug!(addr = %self.config.bind_addr(), "listener bound");

        Ok(PairlineServer {
            listener,
            state: AppState::new(manager, self.config.pairing_wait),
        })
    }
}

/// A bound Pairline server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct PairlineServer<B: Backend> {
    listener: TcpListener,
    state: AppState<B>,
}

impl<B: Backend> PairlineServer<B> {
    pub fn builder() -> PairlineServerBuilder {
        PairlineServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The session manager behind the routes.
    pub fn manager(&self) -> &Arc<Manager<B>> {
        &self.state.manager
    }

    /// Serves until Ctrl-C or SIGTERM, then tears every session down.
    pub async fn run(self) -> Result<(), PairlineError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `signal` resolves. In-flight requests finish, then every
    /// session is shut down before this returns.
    pub async fn run_until<F>(self, signal: F) -> Result<(), PairlineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let manager = Arc::clone(&self.state.manager);
        let router = build_router(self.state);

        tracing::info!(%addr, "Pairline server running");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(signal)
            .await?;

        let closed = manager.shutdown_all().await;
        tracing::info!(sessions = closed, "Pairline server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
