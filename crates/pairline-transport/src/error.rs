use std::io;

/// Failures talking to a push listener.
///
/// None of these are fatal to the session the listener is attached to;
/// the fan-out logs them and moves on to the next listener.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener (or its peer) has gone away.
    #[error("listener closed: {0}")]
    Closed(String),

    /// A frame could not be written.
    #[error("write to listener failed: {0}")]
    Write(#[source] io::Error),

    /// A frame could not be read.
    #[error("read from listener failed: {0}")]
    Read(#[source] io::Error),
}
