//! Wire protocol for Earshot.
//!
//! This crate defines the two "languages" voice clients speak:
//!
//! - **Native packets** ([`NativePacket`], [`NativeCodec`]): fixed binary
//!   layouts for the low-latency datagram transport.
//! - **Signaling messages** ([`SignalMessage`], [`Codec`], [`JsonCodec`]):
//!   `{type, data}` JSON envelopes for browser clients.
//! - **Identities** ([`SessionId`], [`GroupId`]) shared by every layer.
//!
//! # Architecture
//!
//! The protocol layer is pure: it knows nothing about sockets, sessions,
//! or positions. It only turns bytes into typed values and back.
//!
//! ```text
//! Transport (bytes) → Protocol (NativePacket / SignalMessage) → Session
//! ```

mod codec;
mod error;
mod native;
mod signaling;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use native::{
    AUDIO_HEADER_LEN, AUTHENTICATE_ACK_HEADER_LEN, AUTHENTICATE_HEADER_LEN, NativeCodec,
    NativePacket, PacketKinds,
};
pub use signaling::{SessionGrant, SignalMessage, error_code};
pub use types::{GroupId, GroupInfo, SessionId};
