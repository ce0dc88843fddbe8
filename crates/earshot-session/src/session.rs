//! Session types: the server's record of one voice participant.
//!
//! A session tracks:
//! - WHO the participant is (`SessionId`, display name)
//! - HOW audio reaches them (a [`PeerTransport`])
//! - WHAT state they're in (awaiting first audio, connected, dropped)
//! - WHEN they last did anything (for idle sweeps)

use std::time::Duration;

use earshot_protocol::SessionId;
use earshot_transport::PeerTransport;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timing knobs for browser sessions.
///
/// The defaults match what clients are told in `auth_success`: a 30 second
/// resume window and a heartbeat every 5 seconds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long after losing its connection a session may be resumed.
    pub resume_window: Duration,

    /// How often clients are asked to send `heartbeat`.
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resume_window: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a registered session.
///
/// ```text
///   PendingAck ──(first audio)──→ Connected ──(transport lost)──→ Disconnected
///                                     ↑                               │
///                                     └──────────(resume)─────────────┘
/// ```
///
/// Native sessions start in `PendingAck`: the server has acked the
/// handshake but hasn't heard audio yet. Browser sessions are `Connected`
/// as soon as signaling authenticates them. `Disconnected` only applies
/// to browser sessions inside their resume window; nothing is routed to
/// them in that state.
///
/// `Instant` here is tokio's clock so paused-time tests can move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PendingAck,
    Connected,
    Disconnected { since: Instant },
}

impl SessionState {
    /// `PendingAck` and `Connected` sessions are live and receive audio.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Disconnected { .. })
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// One voice participant, independent of which transport carries them.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: SessionId,

    /// User-chosen label. Not unique.
    pub display_name: String,

    /// Where outbound audio goes. Replaced (never duplicated) on resume.
    pub transport: PeerTransport,

    pub authenticated: bool,

    pub state: SessionState,

    /// Last sequence number forwarded to this session. Diagnostics only.
    pub last_sequence_sent: u32,

    /// Last sequence number received from this session. Diagnostics only.
    pub last_sequence_seen: u32,

    pub last_activity: Instant,
}

impl ClientSession {
    /// Creates an authenticated session in the transport's initial state.
    pub fn new(id: SessionId, display_name: String, transport: PeerTransport) -> Self {
        let state = match transport {
            PeerTransport::Native(_) => SessionState::PendingAck,
            PeerTransport::Browser(_) => SessionState::Connected,
        };
        Self {
            id,
            display_name,
            transport,
            authenticated: true,
            state,
            last_sequence_sent: 0,
            last_sequence_seen: 0,
            last_activity: Instant::now(),
        }
    }
}
