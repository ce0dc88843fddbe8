//! Clients for Earshot voice servers.
//!
//! - [`NativeClient`]: the low-latency datagram client: handshake with
//!   a timeout, then a send loop fed by a capture queue and a receive
//!   loop feeding a playback queue.
//! - [`SignalingClient`]: the browser-side protocol over a WebSocket,
//!   including resume with a fallback to fresh authentication.
//!
//! Audio is opaque here: frames go in and come out as encoded bytes.

mod error;
mod native;
mod signaling;

pub use error::ClientError;
pub use native::{NativeClient, NativeClientConfig, ReceivedAudio};
pub use signaling::{SessionStart, SignalEvent, SignalingClient};
