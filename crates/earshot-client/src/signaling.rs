//! Browser-protocol signaling client over a WebSocket.
//!
//! Requests (`authenticate`, `resume`, group commands, `heartbeat`) wait
//! for their reply. Anything else that arrives meanwhile (routed audio,
//! `group_members_updated`) is queued and handed out by
//! [`SignalingClient::next_event`].

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use earshot_protocol::{Codec, GroupId, GroupInfo, JsonCodec, SessionGrant, SessionId, SignalMessage, error_code};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something the server pushed that wasn't a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Signal(SignalMessage),
    /// A routed audio frame (binary frame).
    Audio(Vec<u8>),
}

/// How [`SignalingClient::resume_or_authenticate`] got its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    Resumed(SessionGrant),
    Authenticated(SessionGrant),
}

impl SessionStart {
    pub fn grant(&self) -> &SessionGrant {
        match self {
            Self::Resumed(grant) | Self::Authenticated(grant) => grant,
        }
    }
}

/// A signaling connection to a voice server.
pub struct SignalingClient {
    ws: WsStream,
    codec: JsonCodec,
    grant: Option<SessionGrant>,
    pending: VecDeque<SignalEvent>,
    request_timeout: Duration,
    resume_fallback: Duration,
    /// A late `resumed` answered our fallback `authenticate`; the server
    /// still owes an `already_authenticated` error for it.
    owes_already_authenticated: bool,
}

impl SignalingClient {
    /// Default wait for a request's reply.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default wait for a resume verdict before authenticating fresh.
    pub const RESUME_FALLBACK: Duration = Duration::from_secs(2);

    /// Opens a connection to `url` (e.g. `ws://127.0.0.1:24455`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, "signaling connected");
        Ok(Self {
            ws,
            codec: JsonCodec,
            grant: None,
            pending: VecDeque::new(),
            request_timeout: Self::REQUEST_TIMEOUT,
            resume_fallback: Self::RESUME_FALLBACK,
            owes_already_authenticated: false,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_resume_fallback(mut self, fallback: Duration) -> Self {
        self.resume_fallback = fallback;
        self
    }

    /// The grant from the last successful authenticate or resume.
    pub fn grant(&self) -> Option<&SessionGrant> {
        self.grant.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.grant.as_ref().map(|g| g.session_id)
    }

    // -- Session -------------------------------------------------------------

    /// Full authentication.
    ///
    /// # Errors
    /// [`ClientError::Server`] with code `auth_failed` when rejected.
    pub async fn authenticate(&mut self, username: &str, auth_code: &str) -> Result<SessionGrant, ClientError> {
        Ok(self.start_authenticated(username, auth_code).await?.grant().clone())
    }

    /// Sends `authenticate` and reports which verdict answered it: a
    /// resume we already gave up on may still win the race.
    async fn start_authenticated(&mut self, username: &str, auth_code: &str) -> Result<SessionStart, ClientError> {
        self.send(&SignalMessage::Authenticate {
            username: username.to_string(),
            auth_code: auth_code.to_string(),
        })
        .await?;
        let deadline = Instant::now() + self.request_timeout;
        let reply = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = self
                .await_reply(remaining, |m| {
                    matches!(m, SignalMessage::AuthSuccess(_) | SignalMessage::Resumed(_))
                })
                .await;
            match result {
                // Late verdict on a resume we already gave up on.
                Err(ClientError::Server { code, .. }) if code == error_code::RESUME_FAILED => continue,
                other => break other?,
            }
        };
        match reply {
            SignalMessage::AuthSuccess(grant) => Ok(SessionStart::Authenticated(self.store(grant))),
            // The server won't authenticate us twice; it answers the
            // authenticate we just sent with an error instead.
            SignalMessage::Resumed(grant) => {
                self.owes_already_authenticated = true;
                Ok(SessionStart::Resumed(self.store(grant)))
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Resumes a session from an earlier grant.
    ///
    /// # Errors
    /// [`ClientError::Server`] with code `resume_failed` for an unknown,
    /// mismatched, or expired token.
    pub async fn resume(&mut self, session_id: SessionId, resume_token: &str) -> Result<SessionGrant, ClientError> {
        self.send_resume(session_id, resume_token).await?;
        match self.await_resumed(self.request_timeout).await? {
            SignalMessage::Resumed(grant) => Ok(self.store(grant)),
            other => Err(unexpected(&other)),
        }
    }

    /// Tries to resume `previous`; falls back to authenticating on this
    /// connection if the server says no or stays silent for the fallback
    /// window.
    pub async fn resume_or_authenticate(
        &mut self,
        previous: &SessionGrant,
        username: &str,
        auth_code: &str,
    ) -> Result<SessionStart, ClientError> {
        self.send_resume(previous.session_id, &previous.resume_token).await?;
        match self.await_resumed(self.resume_fallback).await {
            Ok(SignalMessage::Resumed(grant)) => return Ok(SessionStart::Resumed(self.store(grant))),
            Ok(other) => return Err(unexpected(&other)),
            Err(ClientError::Server { code, message }) if code == error_code::RESUME_FAILED => {
                tracing::info!(%message, "resume refused, authenticating");
            }
            Err(ClientError::Timeout(_)) => {
                tracing::info!("no resume verdict, authenticating");
            }
            Err(e) => return Err(e),
        }

        self.start_authenticated(username, auth_code).await
    }

    /// Sends a heartbeat and waits for its echo. Returns the echoed
    /// timestamp (ms since the Unix epoch).
    pub async fn heartbeat(&mut self) -> Result<u64, ClientError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.send(&SignalMessage::Heartbeat { timestamp }).await?;
        let reply = self
            .await_reply(self.request_timeout, |m| {
                matches!(m, SignalMessage::HeartbeatAck { timestamp: t } if *t == timestamp)
            })
            .await?;
        match reply {
            SignalMessage::HeartbeatAck { timestamp } => Ok(timestamp),
            other => Err(unexpected(&other)),
        }
    }

    /// Intentional leave: the server tears the session down, no resume.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&SignalMessage::Disconnect).await?;
        match self.ws.close(None).await {
            Ok(()) | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // -- Voice ---------------------------------------------------------------

    /// Sends one encoded frame as a binary message.
    pub async fn send_audio(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        self.ws.send(Message::Binary(payload.to_vec().into())).await?;
        Ok(())
    }

    /// Reports this client's own position.
    pub async fn update_position(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        world_id: &str,
        yaw: Option<f32>,
        pitch: Option<f32>,
    ) -> Result<(), ClientError> {
        self.send(&SignalMessage::PositionUpdate {
            x,
            y,
            z,
            world_id: world_id.to_string(),
            yaw,
            pitch,
        })
        .await
    }

    // -- Groups --------------------------------------------------------------

    pub async fn create_group(&mut self, name: &str, is_permanent: bool) -> Result<GroupInfo, ClientError> {
        self.send(&SignalMessage::CreateGroup {
            name: name.to_string(),
            is_permanent,
        })
        .await?;
        match self
            .await_reply(self.request_timeout, |m| matches!(m, SignalMessage::GroupCreated(_)))
            .await?
        {
            SignalMessage::GroupCreated(info) => Ok(info),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn join_group(&mut self, group_id: GroupId) -> Result<GroupInfo, ClientError> {
        self.send(&SignalMessage::JoinGroup { group_id }).await?;
        match self
            .await_reply(self.request_timeout, |m| matches!(m, SignalMessage::GroupJoined(_)))
            .await?
        {
            SignalMessage::GroupJoined(info) => Ok(info),
            other => Err(unexpected(&other)),
        }
    }

    /// Leaves the current group. Returns the group left and whether it
    /// was disbanded.
    pub async fn leave_group(&mut self) -> Result<(GroupId, bool), ClientError> {
        self.send(&SignalMessage::LeaveGroup).await?;
        match self
            .await_reply(self.request_timeout, |m| matches!(m, SignalMessage::GroupLeft { .. }))
            .await?
        {
            SignalMessage::GroupLeft { group_id, disbanded } => Ok((group_id, disbanded)),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn list_groups(&mut self) -> Result<Vec<GroupInfo>, ClientError> {
        self.send(&SignalMessage::ListGroups).await?;
        match self
            .await_reply(self.request_timeout, |m| matches!(m, SignalMessage::GroupList { .. }))
            .await?
        {
            SignalMessage::GroupList { groups } => Ok(groups),
            other => Err(unexpected(&other)),
        }
    }

    // -- Events --------------------------------------------------------------

    /// The next pushed event. `Ok(None)` when the server closed the
    /// connection.
    pub async fn next_event(&mut self) -> Result<Option<SignalEvent>, ClientError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        self.read_event().await
    }

    // -- Internals -----------------------------------------------------------

    async fn send(&mut self, msg: &SignalMessage) -> Result<(), ClientError> {
        let text = self.codec.encode_text(msg)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn send_resume(&mut self, session_id: SessionId, resume_token: &str) -> Result<(), ClientError> {
        self.send(&SignalMessage::Resume {
            session_id,
            resume_token: resume_token.to_string(),
        })
        .await
    }

    async fn await_resumed(&mut self, wait: Duration) -> Result<SignalMessage, ClientError> {
        self.await_reply(wait, |m| matches!(m, SignalMessage::Resumed(_)))
            .await
    }

    fn store(&mut self, grant: SessionGrant) -> SessionGrant {
        self.grant = Some(grant.clone());
        grant
    }

    /// Reads until a message `is_reply` accepts, or an `error`.
    ///
    /// Everything else read meanwhile is queued for `next_event`.
    async fn await_reply(
        &mut self,
        wait: Duration,
        is_reply: impl Fn(&SignalMessage) -> bool,
    ) -> Result<SignalMessage, ClientError> {
        let deadline = Instant::now() + wait;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.read_event()).await {
                Ok(Ok(Some(event))) => event,
                Ok(Ok(None)) => return Err(ClientError::Closed),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ClientError::Timeout(wait)),
            };
            match event {
                SignalEvent::Signal(SignalMessage::Error { code, .. })
                    if self.owes_already_authenticated && code == error_code::ALREADY_AUTHENTICATED =>
                {
                    self.owes_already_authenticated = false;
                    tracing::debug!("dropping error for superseded authenticate");
                }
                SignalEvent::Signal(SignalMessage::Error { code, message }) => {
                    return Err(ClientError::Server { code, message });
                }
                SignalEvent::Signal(msg) if is_reply(&msg) => return Ok(msg),
                other => self.pending.push_back(other),
            }
        }
    }

    async fn read_event(&mut self) -> Result<Option<SignalEvent>, ClientError> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            };
            match msg {
                Message::Text(text) => match self.codec.decode::<SignalMessage>(text.as_bytes()) {
                    Ok(signal) => return Ok(Some(SignalEvent::Signal(signal))),
                    Err(e) => tracing::debug!(error = %e, "undecodable signaling message"),
                },
                Message::Binary(data) => return Ok(Some(SignalEvent::Audio(data.to_vec()))),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }
}

fn unexpected(msg: &SignalMessage) -> ClientError {
    ClientError::UnexpectedReply(format!("{msg:?}"))
}
