//! Error types for the session layer.

use earshot_protocol::SessionId;

/// Errors from authentication, admission, and resume.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session exists for the given identity.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The resume token is unknown or has been superseded.
    #[error("invalid resume token")]
    InvalidToken,

    /// The resume window elapsed before the client came back.
    #[error("session {0} expired")]
    SessionExpired(SessionId),

    /// A different client already holds this identity.
    #[error("session already active: {0}")]
    AlreadyConnected(SessionId),
}
