//! `VoiceCore`: every registry, constructed together and torn down together.
//!
//! The core is what the host game talks to (player join/move/quit) and
//! what both listeners share. It owns no sockets; the server loops own
//! those and call in here.

use std::sync::Arc;

use earshot_group::{GroupError, GroupManager, JoinOutcome, LeftGroup};
use earshot_protocol::{
    Codec, GroupId, GroupInfo, JsonCodec, NativeCodec, SessionGrant, SessionId, SignalMessage,
};
use earshot_router::{AudioFrame, BridgeWorker, RouterStatsSnapshot, TransportBridge};
use earshot_session::{ResumeManager, SessionError, SessionRegistry};
use earshot_transport::{BrowserChannel, ConnectionId, PeerTransport};
use earshot_world::{Position, PositionTracker};

use crate::{EarshotError, VoiceConfig};

/// The session, position, group, and resume registries plus the routing
/// bridge, as one explicitly owned service.
#[derive(Debug)]
pub struct VoiceCore {
    config: VoiceConfig,
    codec: NativeCodec,
    signal_codec: JsonCodec,
    sessions: Arc<SessionRegistry>,
    positions: Arc<PositionTracker>,
    groups: Arc<GroupManager>,
    resume: ResumeManager,
    bridge: TransportBridge,
}

impl VoiceCore {
    /// Builds the core from a config.
    ///
    /// Returns the routing worker separately; nothing is routed until
    /// it's spawned.
    ///
    /// # Errors
    /// [`EarshotError::Config`] for colliding packet kinds.
    pub fn new(config: VoiceConfig) -> Result<(Self, BridgeWorker), EarshotError> {
        let config = config.checked()?;
        let codec = NativeCodec::new(config.packet_kinds)?;
        let sessions = Arc::new(SessionRegistry::new());
        let positions = Arc::new(PositionTracker::new());
        let groups = Arc::new(GroupManager::new(config.group_config()));
        let resume = ResumeManager::new(config.session_config());
        let (bridge, worker) = TransportBridge::new(
            config.router_config(),
            codec,
            Arc::clone(&sessions),
            Arc::clone(&positions),
            Arc::clone(&groups),
        );

        let core = Self {
            config,
            codec,
            signal_codec: JsonCodec,
            sessions,
            positions,
            groups,
            resume,
            bridge,
        };
        Ok((core, worker))
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn codec(&self) -> NativeCodec {
        self.codec
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn positions(&self) -> &PositionTracker {
        &self.positions
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn resume(&self) -> &ResumeManager {
        &self.resume
    }

    pub fn router_stats(&self) -> RouterStatsSnapshot {
        self.bridge.stats()
    }

    /// Hands a frame to the router. `false` if it was dropped.
    pub fn submit_audio(&self, sender: SessionId, sequence: u32, payload: Vec<u8>) -> bool {
        self.bridge.submit(AudioFrame::new(sender, sequence, payload))
    }

    // -- Host game events ----------------------------------------------------

    /// A player appeared in the world.
    pub fn on_player_join(&self, id: SessionId, name: &str, x: f64, y: f64, z: f64, world_id: &str) {
        tracing::info!(%id, name, world = world_id, "player joined world");
        self.positions.upsert(id, Position::new(x, y, z, world_id));
    }

    /// A player moved. Replaces the whole position.
    pub fn on_player_move(&self, id: SessionId, x: f64, y: f64, z: f64, world_id: &str) {
        self.positions.upsert(id, Position::new(x, y, z, world_id));
    }

    /// A player left the game: forget the position and end any voice
    /// session under that identity.
    pub fn on_player_quit(&self, id: SessionId) {
        tracing::info!(%id, "player left world");
        self.positions.remove(id);
        self.disconnect_session(id);
    }

    /// Whether `id` has a live voice session, for HUD collaborators.
    pub fn is_session_connected(&self, id: SessionId) -> bool {
        self.sessions.is_connected(id)
    }

    // -- Teardown ------------------------------------------------------------

    /// Ends a session and removes it from every registry.
    ///
    /// Idempotent: returns `false` if there was nothing to tear down.
    pub fn disconnect_session(&self, id: SessionId) -> bool {
        let session = self.sessions.remove(id);
        let had_resume = self.resume.remove(id);
        let had_position = self.positions.remove(id).is_some();
        let left = self.groups.handle_disconnect(id);
        if let Some(left) = &left {
            self.notify_left(left);
        }

        let removed = session.is_some() || had_resume || had_position || left.is_some();
        if removed {
            tracing::info!(%id, "session torn down");
        }
        removed
    }

    /// One sweep: expired resume windows and idle native sessions.
    ///
    /// An expired record whose browser channel is still open belongs to a
    /// connected client that simply hasn't been refreshed; it gets a new
    /// window instead.
    pub fn sweep(&self) {
        for id in self.resume.expired() {
            let still_open = self
                .sessions
                .get(id)
                .is_some_and(|s| s.transport.is_open());
            if still_open {
                self.resume.refresh(id);
            } else {
                tracing::info!(%id, "resume window elapsed");
                self.disconnect_session(id);
            }
        }

        for id in self.sessions.idle_native_sessions(self.config.native_idle_timeout()) {
            tracing::info!(%id, "native session idle, dropping");
            self.disconnect_session(id);
        }
    }

    /// Clears every registry. Open browser channels are closed.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
        self.positions.clear();
        self.groups.shutdown();
        self.resume.shutdown();
        tracing::info!("voice core shut down");
    }

    // -- Browser sessions ----------------------------------------------------

    /// Registers a freshly authenticated browser client.
    pub fn authenticate_browser(
        &self,
        conn_id: ConnectionId,
        display_name: &str,
        channel: BrowserChannel,
    ) -> Result<SessionGrant, SessionError> {
        let id = SessionId::random();
        self.sessions
            .admit(id, display_name, PeerTransport::Browser(channel))?;
        let token = self.resume.issue(id);
        Ok(self.grant(conn_id, id, token))
    }

    /// Moves a dropped browser session onto a new channel.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: unknown session or wrong token
    /// - [`SessionError::SessionExpired`]: too late; the stale session is
    ///   torn down
    pub fn resume_browser(
        &self,
        conn_id: ConnectionId,
        id: SessionId,
        token: &str,
        channel: BrowserChannel,
    ) -> Result<SessionGrant, SessionError> {
        let token = match self.resume.validate(id, token) {
            Ok(token) => token,
            Err(e @ SessionError::SessionExpired(_)) => {
                self.disconnect_session(id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self
            .sessions
            .replace_transport(id, PeerTransport::Browser(channel))
        {
            self.resume.remove(id);
            return Err(e);
        }
        Ok(self.grant(conn_id, id, token))
    }

    /// Called when a browser connection ends without an explicit
    /// `disconnect`. Starts the resume window.
    pub fn browser_transport_lost(&self, id: SessionId, channel: &BrowserChannel) {
        if self.sessions.detach_browser(id, channel) {
            self.resume.refresh(id);
        }
    }

    /// Heartbeat from a browser client.
    pub fn heartbeat(&self, id: SessionId) {
        self.sessions.touch(id);
        self.resume.refresh(id);
    }

    fn grant(&self, conn_id: ConnectionId, session_id: SessionId, resume_token: String) -> SessionGrant {
        SessionGrant {
            client_id: conn_id.to_string(),
            session_id,
            resume_token,
            resume_window_ms: self.resume.resume_window_ms(),
            heartbeat_interval_ms: self.resume.heartbeat_interval_ms(),
        }
    }

    // -- Groups ----------------------------------------------------------------

    /// Creates a group with `creator` in it, notifying a group it left.
    ///
    /// # Errors
    /// [`GroupError::UnknownSession`] unless `creator` is a live session,
    /// plus the name errors from [`GroupManager::create_group`].
    pub fn create_group(&self, creator: SessionId, name: &str, is_permanent: bool) -> Result<JoinOutcome, GroupError> {
        self.require_live(creator)?;
        let outcome = self.groups.create_and_join(creator, name, is_permanent)?;
        if let Some(left) = &outcome.left {
            self.notify_left(left);
        }
        Ok(outcome)
    }

    /// Moves `id` into a group, notifying both affected groups.
    pub fn join_group(&self, id: SessionId, group_id: GroupId) -> Result<JoinOutcome, GroupError> {
        self.require_live(id)?;
        let outcome = self.groups.join_group(id, group_id)?;
        if let Some(left) = &outcome.left {
            self.notify_left(left);
        }
        self.notify_members(&outcome.joined, Some(id));
        Ok(outcome)
    }

    /// Removes `id` from its group, notifying who remains.
    pub fn leave_group(&self, id: SessionId) -> Option<LeftGroup> {
        let left = self.groups.leave_group(id)?;
        self.notify_left(&left);
        Some(left)
    }

    fn require_live(&self, id: SessionId) -> Result<(), GroupError> {
        if self.sessions.is_connected(id) {
            Ok(())
        } else {
            Err(GroupError::UnknownSession(id))
        }
    }

    fn notify_left(&self, left: &LeftGroup) {
        if left.disbanded {
            return;
        }
        let msg = SignalMessage::GroupMembersUpdated {
            group_id: left.group_id,
            members: left.remaining.clone(),
        };
        for member in &left.remaining {
            self.send_signal(*member, &msg);
        }
    }

    fn notify_members(&self, group: &GroupInfo, except: Option<SessionId>) {
        let msg = SignalMessage::GroupMembersUpdated {
            group_id: group.group_id,
            members: group.members.clone(),
        };
        for member in group.members.iter().filter(|m| Some(**m) != except) {
            self.send_signal(*member, &msg);
        }
    }

    /// Pushes a signaling message to a browser session. Native sessions
    /// have no signaling channel and are skipped.
    pub fn send_signal(&self, id: SessionId, msg: &SignalMessage) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let Some(channel) = session.transport.as_browser() else {
            return;
        };
        match self.signal_codec.encode_text(msg) {
            Ok(text) => {
                if let Err(e) = channel.send_text(text) {
                    tracing::debug!(%id, error = %e, "signal not delivered");
                }
            }
            Err(e) => tracing::warn!(%id, error = %e, "cannot encode signal"),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
