//! Error types for the protocol layer.
//!
//! Each crate in Pairline defines its own error enum. A `ProtocolError`
//! always means the problem is in the shape of data (serialization or
//! address parsing), never in networking or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields,
    /// wrong data types, or truncated messages.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A recipient address could not be parsed into the messaging
    /// network's addressing format.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
