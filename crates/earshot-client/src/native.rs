//! Native datagram client.
//!
//! ```text
//! connect() ── Authenticate ──→ server
//!           ←─ AuthenticateAck ─   (matching identity, within auth_timeout)
//!
//! try_send_frame() → [capture queue] → send loop ──→ Audio(seq 1, 2, ...)
//!                                                 ──→ Authenticate (keepalive)
//! recv_audio()     ← [playback queue] ← receive loop ←── Audio from peers
//! ```
//!
//! Both queues are bounded and drop when full; neither loop ever waits on
//! the caller. While the capture queue is quiet the send loop repeats the
//! handshake every `keepalive_interval`, so the server's idle sweep never
//! drops a client that only listens.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use earshot_protocol::{NativeCodec, NativePacket, PacketKinds, SessionId};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::ClientError;

const RECV_BUFFER_LEN: usize = 65_536;

/// Native client settings.
#[derive(Debug, Clone)]
pub struct NativeClientConfig {
    /// How long to wait for the handshake ack.
    pub auth_timeout: Duration,
    /// Encoded frames waiting to be sent.
    pub capture_capacity: usize,
    /// Received frames waiting to be played.
    pub playback_capacity: usize,
    /// How long `disconnect` waits for each loop before aborting it.
    pub shutdown_grace: Duration,
    /// How long the send loop may stay silent before it repeats the
    /// handshake. Keep it well under the server's idle timeout.
    pub keepalive_interval: Duration,
    /// Must match the server's table.
    pub packet_kinds: PacketKinds,
}

impl Default for NativeClientConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            capture_capacity: 64,
            playback_capacity: 64,
            shutdown_grace: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(10),
            packet_kinds: PacketKinds::default(),
        }
    }
}

/// One frame heard from another participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAudio {
    pub sender: SessionId,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// A connected native client.
#[derive(Debug)]
pub struct NativeClient {
    session_id: SessionId,
    local_addr: SocketAddr,
    connected: Arc<AtomicBool>,
    capture: mpsc::Sender<Vec<u8>>,
    playback: Mutex<mpsc::Receiver<ReceivedAudio>>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    shutdown_grace: Duration,
}

impl NativeClient {
    /// Connects under a fresh random identity.
    pub async fn connect(
        server: SocketAddr,
        username: &str,
        config: NativeClientConfig,
    ) -> Result<Self, ClientError> {
        Self::connect_with_id(server, SessionId::random(), username, config).await
    }

    /// Connects under a caller-chosen identity (e.g. the player's id in
    /// the host game).
    ///
    /// # Errors
    /// - [`ClientError::Timeout`]: no matching ack within `auth_timeout`
    /// - [`ClientError::Rejected`]: the server said no
    /// - [`ClientError::Io`]: the socket couldn't be set up
    pub async fn connect_with_id(
        server: SocketAddr,
        session_id: SessionId,
        username: &str,
        config: NativeClientConfig,
    ) -> Result<Self, ClientError> {
        let codec = NativeCodec::new(config.packet_kinds)?;
        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server).await?;
        let local_addr = socket.local_addr()?;
        tracing::debug!(%server, %local_addr, %session_id, "native client handshaking");

        let hello = codec.encode(&NativePacket::Authenticate {
            session_id,
            username: username.to_string(),
        })?;
        socket.send(&hello).await?;

        let (accepted, message) = tokio::time::timeout(config.auth_timeout, await_ack(&socket, &codec, session_id))
            .await
            .map_err(|_| ClientError::Timeout(config.auth_timeout))??;
        if !accepted {
            tracing::info!(%session_id, %message, "handshake rejected");
            return Err(ClientError::Rejected(message));
        }
        tracing::info!(%session_id, %message, "native client connected");

        let socket = Arc::new(socket);
        let connected = Arc::new(AtomicBool::new(true));
        let (capture_tx, capture_rx) = mpsc::channel(config.capture_capacity.max(1));
        let (playback_tx, playback_rx) = mpsc::channel(config.playback_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let sender = tokio::spawn(send_loop(
            Arc::clone(&socket),
            codec,
            session_id,
            hello,
            config.keepalive_interval,
            capture_rx,
            Arc::clone(&connected),
            shutdown_rx.clone(),
        ));
        let receiver = tokio::spawn(receive_loop(
            socket,
            codec,
            playback_tx,
            Arc::clone(&connected),
            shutdown_rx,
        ));

        Ok(Self {
            session_id,
            local_addr,
            connected,
            capture: capture_tx,
            playback: Mutex::new(playback_rx),
            shutdown,
            loops: Mutex::new(Some((sender, receiver))),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues one encoded frame for sending.
    ///
    /// Returns `false` if the frame was dropped (queue full or client
    /// disconnected).
    pub fn try_send_frame(&self, frame: Vec<u8>) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.capture.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("capture queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Waits for the next received frame. `None` once the client is
    /// disconnected and the queue is drained.
    pub async fn recv_audio(&self) -> Option<ReceivedAudio> {
        self.playback.lock().await.recv().await
    }

    /// The next received frame, if one is already queued.
    pub fn try_recv_audio(&self) -> Option<ReceivedAudio> {
        self.playback.try_lock().ok()?.try_recv().ok()
    }

    /// Stops both loops and releases the socket.
    ///
    /// Waits up to `shutdown_grace` for each loop, then aborts it.
    /// Calling this again is a no-op.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let Some((sender, receiver)) = self.loops.lock().await.take() else {
            return;
        };
        self.shutdown.send_replace(true);

        for (name, handle) in [("send", sender), ("receive", receiver)] {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                tracing::warn!(session_id = %self.session_id, name, "loop did not stop in time, aborting");
                abort.abort();
            }
        }
        tracing::info!(session_id = %self.session_id, "native client disconnected");
    }
}

impl Drop for NativeClient {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.shutdown.send_replace(true);
    }
}

/// Reads datagrams until an ack for `session_id` shows up.
async fn await_ack(socket: &UdpSocket, codec: &NativeCodec, session_id: SessionId) -> Result<(bool, String), ClientError> {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        let n = socket.recv(&mut buf).await?;
        match codec.decode(&buf[..n]) {
            Ok(NativePacket::AuthenticateAck {
                session_id: acked,
                accepted,
                message,
            }) if acked == session_id => return Ok((accepted, message)),
            Ok(other) => {
                tracing::debug!(id = %other.session_id(), "ignoring packet while awaiting ack");
            }
            Err(e) => tracing::debug!(error = %e, "undecodable datagram while awaiting ack"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_loop(
    socket: Arc<UdpSocket>,
    codec: NativeCodec,
    session_id: SessionId,
    hello: Vec<u8>,
    keepalive_interval: Duration,
    mut capture: mpsc::Receiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let keepalive_interval = keepalive_interval.max(Duration::from_millis(10));
    let mut sequence: u32 = 0;
    let mut keepalive_at = tokio::time::Instant::now() + keepalive_interval;
    loop {
        let frame = tokio::select! {
            frame = capture.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = tokio::time::sleep_until(keepalive_at) => {
                keepalive_at = tokio::time::Instant::now() + keepalive_interval;
                // The server re-acks a repeated handshake from the same
                // address; the receive loop ignores the ack.
                if let Err(e) = socket.send(&hello).await {
                    report_loop_error(&connected, "send", &e);
                    break;
                }
                tracing::trace!(%session_id, "keepalive sent");
                continue;
            }
            _ = shutdown.changed() => break,
        };
        if frame.is_empty() {
            continue;
        }
        sequence = sequence.wrapping_add(1);
        let bytes = match codec.encode_audio(session_id, sequence, &frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "cannot encode frame");
                continue;
            }
        };
        if let Err(e) = socket.send(&bytes).await {
            report_loop_error(&connected, "send", &e);
            break;
        }
        keepalive_at = tokio::time::Instant::now() + keepalive_interval;
    }
    tracing::debug!(%session_id, "send loop stopped");
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    codec: NativeCodec,
    playback: mpsc::Sender<ReceivedAudio>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        let n = tokio::select! {
            received = socket.recv(&mut buf) => match received {
                Ok(n) => n,
                Err(e) => {
                    report_loop_error(&connected, "receive", &e);
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };
        match codec.decode(&buf[..n]) {
            Ok(NativePacket::Audio {
                session_id,
                sequence,
                payload,
            }) => {
                let audio = ReceivedAudio {
                    sender: session_id,
                    sequence,
                    payload,
                };
                if playback.try_send(audio).is_err() {
                    tracing::trace!("playback queue full, frame dropped");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "undecodable datagram dropped"),
        }
    }
    tracing::debug!("receive loop stopped");
}

/// A loop error is a fault only while the client still thinks it's
/// connected; during an intentional shutdown it's expected.
fn report_loop_error(connected: &AtomicBool, which: &str, e: &std::io::Error) {
    if connected.swap(false, Ordering::AcqRel) {
        tracing::warn!(stage = which, error = %e, "native client loop failed, disconnected");
    } else {
        tracing::debug!(stage = which, error = %e, "loop error after shutdown");
    }
}
