use std::io;
use std::net::SocketAddr;

/// Errors raised by connections and peer transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket couldn't be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The TCP connection came in but the WebSocket upgrade didn't.
    #[error("websocket handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    /// A frame couldn't be written (socket error or WebSocket failure).
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    /// The channel or connection is no longer open.
    #[error("closed: {0}")]
    Closed(&'static str),

    /// A browser channel's outbound queue is full. The frame was dropped.
    #[error("channel backpressured")]
    Backpressured,
}
