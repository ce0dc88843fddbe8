//! Per-connection signaling handler for browser clients.
//!
//! Each accepted WebSocket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `authenticate` or `resume` → bind the connection to a session
//!   2. Loop: heartbeats, audio, positions, group commands
//!   3. On close/timeout/error → session goes `Disconnected`, resumable;
//!      on `disconnect` → session torn down
//!
//! Outbound frames (replies, routed audio, group notifications) all go
//! through one [`BrowserChannel`], drained into the socket by a writer
//! task, so the router never waits on a slow browser.

use std::sync::Arc;
use std::time::Duration;

use earshot_protocol::{Codec, JsonCodec, SessionId, SignalMessage, error_code};
use earshot_session::{Authenticator, SessionError};
use earshot_transport::{BrowserChannel, Connection, ConnectionId, Frame, WebSocketConnection};
use earshot_world::Position;
use tokio::sync::{mpsc, watch};

use crate::EarshotError;
use crate::server::ServerState;

/// How long queued replies get to reach the socket after the read loop
/// ends.
const WRITER_FLUSH: Duration = Duration::from_millis(500);

/// Whether the read loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A>>,
) -> Result<(), EarshotError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new signaling connection");

    let (channel, outbound) = BrowserChannel::new(state.core.config().browser_queue_capacity);
    let (done_tx, done_rx) = watch::channel(false);
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound, done_rx));

    let mut handler = SignalingHandler {
        conn_id,
        channel,
        state,
        codec: JsonCodec,
        session: None,
        audio_sequence: 0,
        left: false,
    };
    let result = handler.read_loop(&conn).await;
    handler.finish();

    // The channel is closed now, so the queue can only shrink.
    done_tx.send_replace(true);
    if tokio::time::timeout(WRITER_FLUSH, &mut writer).await.is_err() {
        tracing::debug!(%conn_id, "writer did not flush in time, aborting");
        writer.abort();
    }
    let _ = conn.close().await;
    result
}

/// Drains the outbound queue into the socket. Once `done` flips, writes
/// whatever is still queued and stops.
async fn write_loop(conn: Arc<WebSocketConnection>, mut outbound: mpsc::Receiver<Frame>, mut done: watch::Receiver<bool>) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
            _ = done.changed() => {
                while let Ok(frame) = outbound.try_recv() {
                    if conn.send(frame).await.is_err() {
                        return;
                    }
                }
                return;
            }
        };
        if let Err(e) = conn.send(frame).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "signaling write failed");
            return;
        }
    }
}

struct SignalingHandler<A: Authenticator> {
    conn_id: ConnectionId,
    channel: BrowserChannel,
    state: Arc<ServerState<A>>,
    codec: JsonCodec,
    /// Set once `authenticate` or `resume` succeeds.
    session: Option<SessionId>,
    /// Numbers binary audio frames, which carry no sequence of their own.
    audio_sequence: u32,
    /// The client sent `disconnect`.
    left: bool,
}

impl<A: Authenticator> SignalingHandler<A> {
    async fn read_loop(&mut self, conn: &WebSocketConnection) -> Result<(), EarshotError> {
        let read_timeout = self.state.core.config().read_timeout();

        loop {
            let frame = match tokio::time::timeout(read_timeout, conn.recv()).await {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    tracing::info!(conn_id = %self.conn_id, "signaling connection closed");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::debug!(conn_id = %self.conn_id, error = %e, "signaling recv error");
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::info!(conn_id = %self.conn_id, "signaling connection timed out");
                    return Ok(());
                }
            };

            if self.session.is_some() && !self.channel.is_open() {
                tracing::info!(conn_id = %self.conn_id, "session moved off this connection");
                return Ok(());
            }

            let flow = match frame {
                Frame::Binary(data) => {
                    self.on_audio(data);
                    Flow::Continue
                }
                Frame::Text(text) => match self.codec.decode::<SignalMessage>(text.as_bytes()) {
                    Ok(msg) => self.dispatch(msg).await,
                    Err(e) => {
                        tracing::debug!(conn_id = %self.conn_id, error = %e, "undecodable signaling message");
                        self.send_error(error_code::INVALID_MESSAGE, &e.to_string());
                        Flow::Continue
                    }
                },
            };
            if flow == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Leaves the session resumable unless the client said goodbye.
    fn finish(&self) {
        if let Some(id) = self.session {
            if !self.left {
                self.state.core.browser_transport_lost(id, &self.channel);
            }
        }
        self.channel.close();
    }

    async fn dispatch(&mut self, msg: SignalMessage) -> Flow {
        match msg {
            SignalMessage::Authenticate { username, auth_code } => {
                self.on_authenticate(&username, &auth_code).await;
            }
            SignalMessage::Resume {
                session_id,
                resume_token,
            } => self.on_resume(session_id, &resume_token),
            SignalMessage::Disconnect => {
                if let Some(id) = self.session {
                    tracing::info!(conn_id = %self.conn_id, %id, "client disconnected");
                    self.state.core.disconnect_session(id);
                    self.left = true;
                }
                return Flow::Close;
            }
            SignalMessage::Heartbeat { timestamp } => {
                if let Some(id) = self.session {
                    self.state.core.heartbeat(id);
                }
                self.reply(&SignalMessage::HeartbeatAck { timestamp });
            }
            SignalMessage::Audio { audio_data } => self.on_audio(audio_data),
            SignalMessage::PositionUpdate {
                x,
                y,
                z,
                world_id,
                yaw,
                pitch,
            } => {
                if let Some(id) = self.require_session() {
                    let position = Position::new(x, y, z, world_id).with_orientation(yaw, pitch);
                    self.state.core.positions().upsert(id, position);
                }
            }
            SignalMessage::CreateGroup { name, is_permanent } => {
                if let Some(id) = self.require_session() {
                    match self.state.core.create_group(id, &name, is_permanent) {
                        Ok(outcome) => self.reply(&SignalMessage::GroupCreated(outcome.joined)),
                        Err(e) => self.send_error(error_code::GROUP_ERROR, &e.to_string()),
                    }
                }
            }
            SignalMessage::JoinGroup { group_id } => {
                if let Some(id) = self.require_session() {
                    match self.state.core.join_group(id, group_id) {
                        Ok(outcome) => self.reply(&SignalMessage::GroupJoined(outcome.joined)),
                        Err(e) => self.send_error(error_code::GROUP_ERROR, &e.to_string()),
                    }
                }
            }
            SignalMessage::LeaveGroup => {
                if let Some(id) = self.require_session() {
                    match self.state.core.leave_group(id) {
                        Some(left) => self.reply(&SignalMessage::GroupLeft {
                            group_id: left.group_id,
                            disbanded: left.disbanded,
                        }),
                        None => self.send_error(error_code::GROUP_ERROR, "not in a group"),
                    }
                }
            }
            SignalMessage::ListGroups => {
                if self.require_session().is_some() {
                    let groups = self.state.core.groups().list_groups();
                    self.reply(&SignalMessage::GroupList { groups });
                }
            }
            SignalMessage::AuthSuccess(_)
            | SignalMessage::Resumed(_)
            | SignalMessage::Error { .. }
            | SignalMessage::HeartbeatAck { .. }
            | SignalMessage::GroupCreated(_)
            | SignalMessage::GroupJoined(_)
            | SignalMessage::GroupLeft { .. }
            | SignalMessage::GroupList { .. }
            | SignalMessage::GroupMembersUpdated { .. } => {
                self.send_error(error_code::INVALID_MESSAGE, "server-to-client message");
            }
        }
        Flow::Continue
    }

    async fn on_authenticate(&mut self, username: &str, auth_code: &str) {
        if self.session.is_some() {
            self.send_error(error_code::ALREADY_AUTHENTICATED, "already authenticated");
            return;
        }
        let display_name = match self.state.auth.authenticate(username, auth_code).await {
            Ok(name) => name,
            Err(e) => {
                tracing::info!(conn_id = %self.conn_id, error = %e, "browser authentication rejected");
                self.send_error(error_code::AUTH_FAILED, &e.to_string());
                return;
            }
        };
        match self
            .state
            .core
            .authenticate_browser(self.conn_id, &display_name, self.channel.clone())
        {
            Ok(grant) => {
                tracing::info!(conn_id = %self.conn_id, id = %grant.session_id, name = %display_name, "browser client authenticated");
                self.session = Some(grant.session_id);
                self.reply(&SignalMessage::AuthSuccess(grant));
            }
            Err(e) => self.send_error(error_code::AUTH_FAILED, &e.to_string()),
        }
    }

    fn on_resume(&mut self, id: SessionId, token: &str) {
        if self.session.is_some() {
            self.send_error(error_code::ALREADY_AUTHENTICATED, "already authenticated");
            return;
        }
        match self
            .state
            .core
            .resume_browser(self.conn_id, id, token, self.channel.clone())
        {
            Ok(grant) => {
                tracing::info!(conn_id = %self.conn_id, %id, "browser session resumed");
                self.session = Some(id);
                self.reply(&SignalMessage::Resumed(grant));
            }
            Err(e) => {
                tracing::info!(conn_id = %self.conn_id, %id, error = %e, "resume rejected");
                let message = match e {
                    SessionError::SessionExpired(_) => "resume window elapsed".to_string(),
                    other => other.to_string(),
                };
                self.send_error(error_code::RESUME_FAILED, &message);
            }
        }
    }

    fn on_audio(&mut self, payload: Vec<u8>) {
        let Some(id) = self.require_session() else {
            return;
        };
        if payload.is_empty() {
            return;
        }
        self.audio_sequence = self.audio_sequence.wrapping_add(1);
        self.state.core.sessions().record_seen(id, self.audio_sequence);
        self.state.core.submit_audio(id, self.audio_sequence, payload);
    }

    /// The bound session, or a `not_authenticated` error to the client.
    fn require_session(&self) -> Option<SessionId> {
        if self.session.is_none() {
            self.send_error(error_code::NOT_AUTHENTICATED, "authenticate or resume first");
        }
        self.session
    }

    fn reply(&self, msg: &SignalMessage) {
        let text = match self.codec.encode_text(msg) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conn_id = %self.conn_id, error = %e, "cannot encode reply");
                return;
            }
        };
        if let Err(e) = self.channel.send_text(text) {
            tracing::debug!(conn_id = %self.conn_id, error = %e, "reply not delivered");
        }
    }

    fn send_error(&self, code: &str, message: &str) {
        self.reply(&SignalMessage::error(code, message));
    }
}
