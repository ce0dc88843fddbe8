//! Identity types shared by every layer.
//!
//! Both identities are 128-bit random values. On the native wire they
//! travel as 16 raw bytes; in signaling JSON they are hyphenated UUID
//! strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identity of one voice participant.
///
/// Assigned at authentication and stable across a resumed connection.
/// Native clients choose their own (usually the player's game UUID) and
/// the server reuses it; browser clients get a fresh random one.
///
/// `#[serde(transparent)]` makes it serialize as the bare UUID string,
/// not as `{ "0": "..." }`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Length of the identity on the native wire.
    pub const WIRE_LEN: usize = 16;

    /// Generates a new random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an identity from its 16 wire bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the 16 wire bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Identity of an explicit voice group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub Uuid);

impl GroupId {
    /// Generates a new random group identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupInfo
// ---------------------------------------------------------------------------

/// A read-only summary of a group, as returned by listings and sent to
/// browser clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    /// The group's identity.
    pub group_id: GroupId,
    /// Display name, unique case-insensitively.
    pub name: String,
    /// Whether the group survives having zero members.
    pub is_permanent: bool,
    /// Current members.
    pub members: Vec<SessionId>,
}
