//! Transport layer for Earshot.
//!
//! Two very different things travel through here:
//!
//! - **Connections** ([`Transport`], [`Connection`]): the browser
//!   signaling channel. A framed, bidirectional channel per client;
//!   today a WebSocket.
//! - **Peer transports** ([`PeerTransport`]): the handle the router uses
//!   to push audio at a session. It is either a native datagram endpoint
//!   or a browser channel; both expose `send(bytes)` and `is_open()`, and
//!   neither ever blocks.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket connections via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod peer;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use peer::{BrowserChannel, NativeEndpoint, PeerTransport, TransportKind};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one signaling connection. A resumed session gets a new one.
///
/// Shown to clients as `conn-N` (the `clientId` of a grant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One message on a signaling connection.
///
/// Signaling goes out as `Text`; audio payloads go out as `Binary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Listens for signaling connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next connection that completes its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting. Open connections are left to their handlers.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single signaling connection.
///
/// Sending and receiving are independent: one task may sit in `recv`
/// while another calls `send`.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, frame: Frame) -> Result<(), Self::Error>;

    /// The next text or binary frame. `Ok(None)` once the peer closed.
    async fn recv(&self) -> Result<Option<Frame>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;
}
