//! Codec trait and implementations for serializing push events.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The fan-out layer doesn't care HOW an event becomes bytes before it is
//! written to a listener; it just needs something that implements
//! [`Codec`]. Listeners today are browser WebSockets, so [`JsonCodec`] is
//! the default.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → safe to share between threads (the session manager
///   publishes from handshake tasks running on any worker thread).
/// - `'static` → the codec owns everything it needs, so it can live
///   inside long-lived shared state.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use pairline_protocol::{Codec, JsonCodec, PushEvent, SessionId};
///
/// let codec = JsonCodec;
/// let event = PushEvent::qr_code(SessionId::from("s1"), "ABC123");
///
/// let bytes = codec.encode(&event).unwrap();
/// let decoded: PushEvent = codec.decode(&bytes).unwrap();
/// assert_eq!(event, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{PushEvent, SessionId};

    #[test]
    fn test_json_codec_encodes_push_event_as_json_text() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&PushEvent::disconnected(SessionId::from("s1")))
            .unwrap();
        let text = std::str::from_utf8(&bytes).expect("JSON is UTF-8");
        assert!(text.contains("\"session_disconnected\""));
    }

    #[test]
    fn test_json_codec_decode_garbage_returns_decode_error() {
        let codec = JsonCodec;
        let result: Result<PushEvent, _> = codec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
