//! Client error type.

use std::time::Duration;

use earshot_protocol::ProtocolError;

/// Errors from either client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server didn't answer in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The native handshake was refused. Carries the server's reason.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The server answered a signaling request with `error`.
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },

    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// A reply arrived that makes no sense for the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    /// The server's error code, if this is a server-side rejection.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}
