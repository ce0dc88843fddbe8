//! Codec trait and implementations for signaling messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The signaling layer doesn't care HOW messages are serialized, it just
//! needs something that implements [`Codec`]. Browsers speak JSON, so
//! [`JsonCodec`] is the one the server and the bundled clients use.
//!
//! The native datagram transport does NOT go through this trait: its
//! packets have a fixed binary layout, see [`crate::NativeCodec`].

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec value is shared by every
/// connection task for the life of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Serializes a value for a text frame.
    ///
    /// WebSocket text frames must be UTF-8; codecs that emit binary
    /// output fail here rather than corrupt the frame.
    fn encode_text<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        let bytes = self.encode(value)?;
        String::from_utf8(bytes).map_err(|_| {
            ProtocolError::InvalidMessage("codec output is not valid UTF-8".into())
        })
    }
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
/// use earshot_protocol::{Codec, JsonCodec, SignalMessage};
///
/// let codec = JsonCodec;
/// let msg = SignalMessage::Heartbeat { timestamp: 5000 };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: SignalMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn encode_text<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::SignalMessage;

    #[test]
    fn test_json_codec_decode_garbage_returns_error() {
        let result: Result<SignalMessage, _> = JsonCodec.decode(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_encode_text_matches_encode() {
        let msg = SignalMessage::ListGroups;
        let text = JsonCodec.encode_text(&msg).unwrap();
        assert_eq!(text.as_bytes(), JsonCodec.encode(&msg).unwrap().as_slice());
    }
}
