//! Error types for the group layer.

use earshot_protocol::{GroupId, SessionId};

/// Errors from group operations.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// The name breaks the length or character rules.
    #[error("invalid group name: {0}")]
    InvalidName(String),

    /// Another group already has this name (case-insensitive).
    #[error("group name already taken: {0}")]
    NameTaken(String),

    /// The group does not exist, or was disbanded meanwhile.
    #[error("group {0} not found")]
    NotFound(GroupId),

    /// The session isn't registered (or has dropped), so it can't be
    /// placed in a group.
    #[error("session {0} is not connected")]
    UnknownSession(SessionId),

    /// The session is already a member of this group.
    #[error("already a member of group {0}")]
    AlreadyMember(GroupId),
}
