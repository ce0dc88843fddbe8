//! Native datagram listener: handshake and audio intake.
//!
//! One task owns the receive side of the UDP socket. Each datagram is
//! decoded and handled in place, except authentication, which may await
//! the host's [`Authenticator`] and so runs on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use earshot_protocol::{NativeCodec, NativePacket, SessionId};
use earshot_session::{Admission, Authenticator, SessionError};
use earshot_transport::{NativeEndpoint, PeerTransport};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::VoiceCore;

/// Largest datagram accepted. Anything bigger is truncated by the OS and
/// then fails to decode.
const RECV_BUFFER_LEN: usize = 65_536;

pub(crate) struct NativeListener<A: Authenticator> {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) core: Arc<VoiceCore>,
    pub(crate) auth: Arc<A>,
}

impl<A: Authenticator> NativeListener<A> {
    /// Receives until `shutdown` flips to `true`.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let codec = self.core.codec();
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        tracing::debug!("native listener started");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, src)) => self.handle_datagram(&codec, &buf[..n], src),
                        Err(e) => tracing::warn!(error = %e, "datagram receive failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("native listener stopped");
    }

    fn handle_datagram(&self, codec: &NativeCodec, data: &[u8], src: SocketAddr) {
        let packet = match codec.decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%src, error = %e, "undecodable datagram dropped");
                return;
            }
        };

        match packet {
            NativePacket::Authenticate { session_id, username } => {
                let socket = Arc::clone(&self.socket);
                let core = Arc::clone(&self.core);
                let auth = Arc::clone(&self.auth);
                let codec = *codec;
                tokio::spawn(async move {
                    let (accepted, message) = authenticate(&core, auth.as_ref(), &socket, session_id, &username, src).await;
                    send_ack(&socket, &codec, src, session_id, accepted, message).await;
                });
            }
            NativePacket::Audio {
                session_id,
                sequence,
                payload,
            } => {
                // The header carries an identity, the source address proves it.
                if !self.core.sessions().endpoint_matches(session_id, src) {
                    tracing::debug!(%src, %session_id, "audio from unregistered endpoint dropped");
                    return;
                }
                let sessions = self.core.sessions();
                sessions.record_seen(session_id, sequence);
                sessions.mark_connected(session_id);
                self.core.submit_audio(session_id, sequence, payload);
            }
            NativePacket::AuthenticateAck { .. } => {
                tracing::debug!(%src, "unexpected ack from client dropped");
            }
        }
    }
}

/// Runs the handshake for one `Authenticate` packet. Returns the ack
/// verdict and message.
async fn authenticate<A: Authenticator>(
    core: &VoiceCore,
    auth: &A,
    socket: &Arc<UdpSocket>,
    session_id: SessionId,
    username: &str,
    src: SocketAddr,
) -> (bool, String) {
    if username.trim().is_empty() {
        return (false, "username must not be empty".to_string());
    }

    let display_name = match auth.authenticate(username, "").await {
        Ok(name) => name,
        Err(SessionError::AuthFailed(reason)) => {
            tracing::info!(%src, %session_id, %reason, "native authentication rejected");
            return (false, reason);
        }
        Err(e) => return (false, e.to_string()),
    };

    let endpoint = NativeEndpoint::new(Arc::clone(socket), src);
    match core
        .sessions()
        .admit(session_id, display_name.as_str(), PeerTransport::Native(endpoint))
    {
        Ok(Admission::Admitted) => {
            tracing::info!(%src, %session_id, name = %display_name, "native client authenticated");
            (true, format!("welcome, {display_name}"))
        }
        Ok(Admission::Reacknowledged) => (true, format!("welcome, {display_name}")),
        Err(SessionError::AlreadyConnected(_)) => {
            tracing::info!(%src, %session_id, "identity already active elsewhere");
            (false, "session already active".to_string())
        }
        Err(e) => (false, e.to_string()),
    }
}

async fn send_ack(
    socket: &UdpSocket,
    codec: &NativeCodec,
    dest: SocketAddr,
    session_id: SessionId,
    accepted: bool,
    message: String,
) {
    let ack = NativePacket::AuthenticateAck {
        session_id,
        accepted,
        message,
    };
    let bytes = match codec.encode(&ack) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(%dest, error = %e, "cannot encode ack");
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, dest).await {
        tracing::debug!(%dest, error = %e, "ack send failed");
    }
}
