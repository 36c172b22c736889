//! Wire types for Pairline.
//!
//! This crate defines everything that leaves the process:
//!
//! - **Types** ([`SessionSnapshot`], [`PushEvent`], [`ApiResponse`], ...):
//!   what the REST endpoints return and what listeners receive.
//! - **Addresses** ([`Address`]): recipient parsing for outbound messages.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how push events become
//!   bytes on a listener transport.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (state machine). It knows nothing about locks or connections.
//!
//! ```text
//! Transport (bytes) ← Protocol (PushEvent) ← Session (state changes)
//! ```

mod address;
mod codec;
mod error;
mod types;

pub use address::Address;
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ApiResponse, ConnectionData, InboundMessage, PushEvent, QrCodeData,
    SessionId, SessionSnapshot, SessionStatus,
};
