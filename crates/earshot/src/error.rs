//! Unified error type for the Earshot server.

use earshot_group::GroupError;
use earshot_protocol::ProtocolError;
use earshot_session::SessionError;
use earshot_transport::TransportError;

/// Top-level error wrapping every layer's error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum EarshotError {
    /// A transport-level error (bind, accept, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, packet kinds).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, resume, duplicate identity).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A group-level error (name, membership).
    #[error(transparent)]
    Group(#[from] GroupError),

    /// Socket bind or file I/O.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration can't be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}
