//! Error types for the protocol layer.
//!
//! Each crate in Earshot defines its own error enum. A `ProtocolError`
//! always means the problem is in turning bytes into messages (or back),
//! never in networking or session state.

/// Errors that can occur in the protocol layer.
///
/// Decode failures on the native transport are expected traffic: a
/// hostile or buggy peer can send anything. Callers drop the datagram and
/// move on, they never tear down routing because of one of these.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of a signaling message failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization of a signaling message failed.
    ///
    /// Common causes: malformed JSON, missing required fields, or an
    /// unknown `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The buffer is shorter than the fixed header of its packet kind
    /// (or is empty).
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },

    /// A declared length field points past the end of the buffer.
    #[error("declared length {declared} overruns buffer ({available} bytes left)")]
    LengthOverrun { declared: usize, available: usize },

    /// An audio packet declared a zero-length payload.
    #[error("audio packet with empty payload")]
    EmptyPayload,

    /// The first byte doesn't match any configured packet kind.
    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownPacketKind(u8),

    /// A text field is not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A field is too long to fit its length prefix on encode.
    #[error("{field} is {len} bytes, exceeds wire limit of {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// The message is invalid at the protocol level.
    ///
    /// For logical errors that pass decoding but violate protocol rules,
    /// e.g. a packet-kind table that assigns one byte to two kinds.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
