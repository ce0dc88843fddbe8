//! The two shapes a session's audio transport can take.
//!
//! ```text
//!                 ┌── Native(NativeEndpoint)  → try_send_to(remote addr)
//! PeerTransport ──┤
//!                 └── Browser(BrowserChannel) → try_send onto the writer queue
//! ```
//!
//! Neither shape waits: a full socket buffer or a full browser queue is a
//! dropped frame, reported as an error the caller counts and moves past.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::{Frame, TransportError};

/// Which shape a [`PeerTransport`] has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Native,
    Browser,
}

// ---------------------------------------------------------------------------
// NativeEndpoint
// ---------------------------------------------------------------------------

/// A native client's remote address plus the server socket to reach it.
///
/// The socket is shared by every native session; cloning the endpoint is
/// an `Arc` bump.
#[derive(Debug, Clone)]
pub struct NativeEndpoint {
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
}

impl NativeEndpoint {
    pub fn new(socket: Arc<UdpSocket>, addr: SocketAddr) -> Self {
        Self { addr, socket }
    }

    /// The client's remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket
            .try_send_to(bytes, self.addr)
            .map(|_| ())
            .map_err(TransportError::Send)
    }
}

// ---------------------------------------------------------------------------
// BrowserChannel
// ---------------------------------------------------------------------------

/// Handle to a browser client's outbound frame queue.
///
/// The connection handler owns the receiving end and writes frames to the
/// socket. This side only enqueues. `open` is shared between clones, so
/// closing any clone closes them all.
#[derive(Debug, Clone)]
pub struct BrowserChannel {
    tx: mpsc::Sender<Frame>,
    open: Arc<AtomicBool>,
}

impl BrowserChannel {
    /// Creates an open channel with room for `capacity` queued frames.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (channel, rx)
    }

    /// Enqueues a frame without waiting.
    ///
    /// # Errors
    /// - [`TransportError::Closed`]: channel closed or writer gone
    /// - [`TransportError::Backpressured`]: queue full, frame dropped
    pub fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed("browser channel closed"));
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Backpressured),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(TransportError::Closed("browser writer stopped"))
            }
        }
    }

    /// Enqueues a signaling message as a text frame.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.send_frame(Frame::Text(text))
    }

    /// `true` until [`close`](Self::close) is called or the writer exits.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Marks the channel closed. Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether two handles refer to the same underlying channel.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.open, &other.open)
    }
}

// ---------------------------------------------------------------------------
// PeerTransport
// ---------------------------------------------------------------------------

/// A session's audio transport: one of exactly two shapes.
#[derive(Debug, Clone)]
pub enum PeerTransport {
    Native(NativeEndpoint),
    Browser(BrowserChannel),
}

impl PeerTransport {
    /// Pushes already-encoded bytes at the peer.
    ///
    /// Native peers get one datagram. Browser peers get one binary frame.
    /// Never waits.
    pub fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Native(endpoint) => endpoint.send(bytes),
            Self::Browser(channel) => channel.send_frame(Frame::Binary(bytes.to_vec())),
        }
    }

    /// Whether the peer can currently take frames.
    ///
    /// A native endpoint is always open: datagrams have no connection
    /// state, and a dead client is removed by the idle sweep instead.
    pub fn is_open(&self) -> bool {
        match self {
            Self::Native(_) => true,
            Self::Browser(channel) => channel.is_open(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Native(_) => TransportKind::Native,
            Self::Browser(_) => TransportKind::Browser,
        }
    }

    /// Closes a browser channel; a no-op for native endpoints.
    pub fn close(&self) {
        if let Self::Browser(channel) = self {
            channel.close();
        }
    }

    /// The remote address, for native peers.
    pub fn native_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Native(endpoint) => Some(endpoint.addr()),
            Self::Browser(_) => None,
        }
    }

    /// The browser channel, for browser peers.
    pub fn as_browser(&self) -> Option<&BrowserChannel> {
        match self {
            Self::Browser(channel) => Some(channel),
            Self::Native(_) => None,
        }
    }
}
