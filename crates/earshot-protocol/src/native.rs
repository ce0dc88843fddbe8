//! Binary packets for the native datagram transport.
//!
//! Three packet kinds, each a flat layout with the kind byte first:
//!
//! ```text
//! Authenticate     [kind][session_id: 16][name_len: u32 BE][username: UTF-8]
//! Authenticate-Ack [kind][session_id: 16][accepted: u8][msg_len: u16 BE][message: UTF-8]
//! Audio            [kind][session_id: 16][sequence: u32 BE][payload_len: u32 BE][payload]
//! ```
//!
//! The kind bytes are data, not constants: client and server share one
//! [`PacketKinds`] table (usually from config) so both sides agree on the
//! assignment. Decoding is a pure function of that table and the buffer.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{ProtocolError, SessionId};

/// Fixed header of an Authenticate packet (kind + identity + length).
pub const AUTHENTICATE_HEADER_LEN: usize = 1 + SessionId::WIRE_LEN + 4;

/// Fixed header of an Authenticate-Ack packet.
pub const AUTHENTICATE_ACK_HEADER_LEN: usize = 1 + SessionId::WIRE_LEN + 1 + 2;

/// Fixed header of an Audio packet.
pub const AUDIO_HEADER_LEN: usize = 1 + SessionId::WIRE_LEN + 4 + 4;

// ---------------------------------------------------------------------------
// PacketKinds
// ---------------------------------------------------------------------------

/// The byte assigned to each packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketKinds {
    pub authenticate: u8,
    pub authenticate_ack: u8,
    pub audio: u8,
}

impl Default for PacketKinds {
    fn default() -> Self {
        Self {
            authenticate: 0x01,
            authenticate_ack: 0x02,
            audio: 0x00,
        }
    }
}

impl PacketKinds {
    /// Checks that no two kinds share a byte.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] on a collision, since
    /// decoding would be ambiguous.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let Self {
            authenticate,
            authenticate_ack,
            audio,
        } = *self;
        if authenticate == authenticate_ack
            || authenticate == audio
            || authenticate_ack == audio
        {
            return Err(ProtocolError::InvalidMessage(format!(
                "packet kinds must be distinct (authenticate=0x{authenticate:02x}, \
                 authenticate_ack=0x{authenticate_ack:02x}, audio=0x{audio:02x})"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NativePacket
// ---------------------------------------------------------------------------

/// A fully decoded native-transport packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativePacket {
    /// Client → Server: "I am `session_id`, call me `username`."
    Authenticate {
        session_id: SessionId,
        username: String,
    },

    /// Server → Client: handshake verdict with a human-readable message.
    AuthenticateAck {
        session_id: SessionId,
        accepted: bool,
        message: String,
    },

    /// Either direction: one encoded audio frame.
    Audio {
        session_id: SessionId,
        sequence: u32,
        payload: Vec<u8>,
    },
}

impl NativePacket {
    /// The identity carried in the packet header.
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Authenticate { session_id, .. }
            | Self::AuthenticateAck { session_id, .. }
            | Self::Audio { session_id, .. } => *session_id,
        }
    }
}

// ---------------------------------------------------------------------------
// NativeCodec
// ---------------------------------------------------------------------------

/// Encodes and decodes [`NativePacket`]s under one [`PacketKinds`] table.
///
/// Stateless and `Copy`; every socket loop keeps its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeCodec {
    kinds: PacketKinds,
}

impl NativeCodec {
    /// Creates a codec for the given kind table.
    ///
    /// # Errors
    /// Fails if two kinds share a byte.
    pub fn new(kinds: PacketKinds) -> Result<Self, ProtocolError> {
        kinds.validate()?;
        Ok(Self { kinds })
    }

    /// The kind table this codec speaks.
    pub fn kinds(&self) -> PacketKinds {
        self.kinds
    }

    /// Serializes a packet.
    ///
    /// # Errors
    /// Returns [`ProtocolError::FieldTooLong`] if a variable-length field
    /// doesn't fit its length prefix, or [`ProtocolError::EmptyPayload`]
    /// for an audio packet no decoder would accept.
    pub fn encode(&self, packet: &NativePacket) -> Result<Vec<u8>, ProtocolError> {
        match packet {
            NativePacket::Authenticate {
                session_id,
                username,
            } => {
                let len = u32::try_from(username.len()).map_err(|_| {
                    ProtocolError::FieldTooLong {
                        field: "username",
                        len: username.len(),
                        max: u32::MAX as usize,
                    }
                })?;
                let mut buf = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + username.len());
                buf.put_u8(self.kinds.authenticate);
                buf.put_slice(session_id.as_bytes());
                buf.put_u32(len);
                buf.put_slice(username.as_bytes());
                Ok(buf)
            }
            NativePacket::AuthenticateAck {
                session_id,
                accepted,
                message,
            } => {
                let len = u16::try_from(message.len()).map_err(|_| {
                    ProtocolError::FieldTooLong {
                        field: "message",
                        len: message.len(),
                        max: u16::MAX as usize,
                    }
                })?;
                let mut buf =
                    Vec::with_capacity(AUTHENTICATE_ACK_HEADER_LEN + message.len());
                buf.put_u8(self.kinds.authenticate_ack);
                buf.put_slice(session_id.as_bytes());
                buf.put_u8(u8::from(*accepted));
                buf.put_u16(len);
                buf.put_slice(message.as_bytes());
                Ok(buf)
            }
            NativePacket::Audio {
                session_id,
                sequence,
                payload,
            } => self.encode_audio(*session_id, *sequence, payload),
        }
    }

    /// Serializes an Audio packet straight from borrowed parts.
    ///
    /// The router re-encodes every forwarded frame under the sender's
    /// registered identity; this avoids building a [`NativePacket`] (and
    /// cloning the payload) just to encode it.
    pub fn encode_audio(
        &self,
        session_id: SessionId,
        sequence: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FieldTooLong {
            field: "payload",
            len: payload.len(),
            max: u32::MAX as usize,
        })?;
        let mut buf = Vec::with_capacity(AUDIO_HEADER_LEN + payload.len());
        buf.put_u8(self.kinds.audio);
        buf.put_slice(session_id.as_bytes());
        buf.put_u32(sequence);
        buf.put_u32(len);
        buf.put_slice(payload);
        Ok(buf)
    }

    /// Parses a datagram into a packet.
    ///
    /// Trailing bytes after the declared length are ignored.
    ///
    /// # Errors
    /// Any [`ProtocolError`] means "drop this datagram".
    pub fn decode(&self, buf: &[u8]) -> Result<NativePacket, ProtocolError> {
        let Some(&kind) = buf.first() else {
            return Err(ProtocolError::PacketTooShort {
                expected: 1,
                got: 0,
            });
        };

        if kind == self.kinds.audio {
            decode_audio(buf)
        } else if kind == self.kinds.authenticate {
            decode_authenticate(buf)
        } else if kind == self.kinds.authenticate_ack {
            decode_authenticate_ack(buf)
        } else {
            Err(ProtocolError::UnknownPacketKind(kind))
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

fn decode_authenticate(buf: &[u8]) -> Result<NativePacket, ProtocolError> {
    let mut cur = header(buf, AUTHENTICATE_HEADER_LEN)?;
    let session_id = read_session_id(&mut cur);
    let len = cur.get_u32() as usize;
    let username = read_utf8(&mut cur, len, "username")?;
    Ok(NativePacket::Authenticate {
        session_id,
        username,
    })
}

fn decode_authenticate_ack(buf: &[u8]) -> Result<NativePacket, ProtocolError> {
    let mut cur = header(buf, AUTHENTICATE_ACK_HEADER_LEN)?;
    let session_id = read_session_id(&mut cur);
    let accepted = cur.get_u8() != 0;
    let len = usize::from(cur.get_u16());
    let message = read_utf8(&mut cur, len, "message")?;
    Ok(NativePacket::AuthenticateAck {
        session_id,
        accepted,
        message,
    })
}

fn decode_audio(buf: &[u8]) -> Result<NativePacket, ProtocolError> {
    let mut cur = header(buf, AUDIO_HEADER_LEN)?;
    let session_id = read_session_id(&mut cur);
    let sequence = cur.get_u32();
    let len = cur.get_u32() as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyPayload);
    }
    let payload = take(&mut cur, len)?.to_vec();
    Ok(NativePacket::Audio {
        session_id,
        sequence,
        payload,
    })
}

/// Checks the fixed header length and returns a cursor just past the
/// kind byte. Every `get_*` on the returned cursor up to `header_len`
/// is then in bounds.
fn header(buf: &[u8], header_len: usize) -> Result<&[u8], ProtocolError> {
    if buf.len() < header_len {
        return Err(ProtocolError::PacketTooShort {
            expected: header_len,
            got: buf.len(),
        });
    }
    Ok(&buf[1..])
}

fn read_session_id(cur: &mut &[u8]) -> SessionId {
    let mut bytes = [0u8; SessionId::WIRE_LEN];
    cur.copy_to_slice(&mut bytes);
    SessionId::from_bytes(bytes)
}

fn take<'a>(cur: &mut &'a [u8], len: usize) -> Result<&'a [u8], ProtocolError> {
    if cur.len() < len {
        return Err(ProtocolError::LengthOverrun {
            declared: len,
            available: cur.len(),
        });
    }
    let (head, tail) = cur.split_at(len);
    *cur = tail;
    Ok(head)
}

fn read_utf8(
    cur: &mut &[u8],
    len: usize,
    field: &'static str,
) -> Result<String, ProtocolError> {
    let bytes = take(cur, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

// =========================================================================
// Tests
// =========================================================================
