//! # Pairline
//!
//! Multi-session gateway for a paired-device messaging network.
//!
//! Each session is one paired device. Clients start a session over HTTP,
//! fetch the pairing code, watch it move to `connected`, then send text
//! messages through it. Every state change and every inbound message is
//! pushed to the WebSocket listeners attached to that session.
//!
//! The network itself sits behind the [`Backend`](pairline_session::Backend)
//! trait; [`pairline_session::sim::SimBackend`] is an in-process stand-in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pairline::prelude::*;
//! use pairline_session::sim::SimBackend;
//!
//! # async fn start() -> Result<(), PairlineError> {
//! init_tracing();
//! let server = PairlineServer::<SimBackend>::builder()
//!     .config(ServerConfig::from_env()?)
//!     .build(SimBackend::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod logging;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::PairlineError;
pub use logging::init_tracing;
pub use server::{build_router, AppState, Manager, PairlineServer, PairlineServerBuilder};

pub mod prelude {
    pub use crate::{init_tracing, PairlineError, PairlineServer, ServerConfig};
    pub use pairline_protocol::{PushEvent, SessionId, SessionStatus};
    pub use pairline_session::{Backend, CreateOutcome, Credentials};
}
