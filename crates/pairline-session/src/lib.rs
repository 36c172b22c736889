//! Session management for Pairline.
//!
//! This crate owns the lifecycle of every messaging session:
//!
//! 1. **Registry**: which sessions exist ([`Registry`])
//! 2. **State machine**: where each one is in pairing ([`Session`], [`Phase`])
//! 3. **Lifecycle**: driving the external client through pairing,
//!    reconnect, and its event stream ([`lifecycle`])
//! 4. **Fan-out**: pushing events to every listener of a session
//!
//! [`SessionManager`] ties these together and is what the HTTP layer talks
//! to.
//!
//! # How it fits in the stack
//!
//! ```text
//! Control plane (above)  ← REST handlers and WebSocket subscriptions
//!     ↕
//! Session Layer (this crate)  ← registry, state machine, fan-out
//!     ↕                ↕
//! Protocol Layer    ProtocolClient (external messaging library)
//! ```
//!
//! # Locking
//!
//! Two levels, always taken in this order: the registry's map lock, then a
//! session's own lock. The registry lock is synchronous and only ever
//! guards map reads and writes. A session's lock is async and guards its
//! phase, client, and listeners. Network calls to the protocol client are
//! never made while either lock is held.

mod client;
mod error;
mod fanout;
pub mod lifecycle;
mod manager;
mod registry;
mod session;
pub mod sim;

pub use client::{
    Backend, ClientEvent, CredentialStore, ProtocolClient, SendReceipt,
};
pub use error::{ClientError, SessionError};
pub use manager::{Health, SessionManager};
pub use registry::{CreateOutcome, Registry};
pub use session::{Credentials, Phase, Session, SessionConfig};
