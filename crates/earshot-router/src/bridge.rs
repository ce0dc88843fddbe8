//! The transport bridge: one bounded queue, one routing worker.

use std::collections::HashSet;
use std::sync::Arc;

use earshot_group::GroupManager;
use earshot_protocol::{NativeCodec, SessionId};
use earshot_session::SessionRegistry;
use earshot_transport::{PeerTransport, TransportError, TransportKind};
use earshot_world::PositionTracker;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{NoPositionPolicy, RouterConfig, RouterStats, RouterStatsSnapshot, RoutingMode, hears};

/// One inbound audio frame, waiting to be routed. Never persisted.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sender: SessionId,
    /// Sender's sequence number, passed through to native recipients.
    pub sequence: u32,
    /// Opaque codec output.
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

impl AudioFrame {
    pub fn new(sender: SessionId, sequence: u32, payload: Vec<u8>) -> Self {
        Self {
            sender,
            sequence,
            payload,
            received_at: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportBridge (producer side)
// ---------------------------------------------------------------------------

/// Producer handle. Cheap to clone; every receive path holds one.
#[derive(Debug, Clone)]
pub struct TransportBridge {
    tx: mpsc::Sender<AudioFrame>,
    stats: Arc<RouterStats>,
}

impl TransportBridge {
    /// Builds the bridge and its worker. The worker does nothing until
    /// [`BridgeWorker::run`] or [`BridgeWorker::spawn`].
    pub fn new(
        config: RouterConfig,
        codec: NativeCodec,
        sessions: Arc<SessionRegistry>,
        positions: Arc<PositionTracker>,
        groups: Arc<GroupManager>,
    ) -> (Self, BridgeWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(RouterStats::default());
        let bridge = Self {
            tx,
            stats: Arc::clone(&stats),
        };
        let worker = BridgeWorker {
            rx,
            router: Router {
                config,
                codec,
                sessions,
                positions,
                groups,
                stats,
            },
        };
        (bridge, worker)
    }

    /// Queues a frame without waiting.
    ///
    /// Returns `false` if the frame was dropped: the queue was full (the
    /// arriving frame loses, queued frames stay) or the worker is gone.
    pub fn submit(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                RouterStats::bump(&self.stats.accepted);
                true
            }
            Err(mpsc::error::TrySendError::Full(frame)) => {
                RouterStats::bump(&self.stats.dropped_overflow);
                tracing::trace!(sender = %frame.sender, "routing queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}

// ---------------------------------------------------------------------------
// BridgeWorker (consumer side)
// ---------------------------------------------------------------------------

/// The single consumer. Owns every routing decision, so routing itself
/// needs no locks.
#[derive(Debug)]
pub struct BridgeWorker {
    rx: mpsc::Receiver<AudioFrame>,
    router: Router,
}

impl BridgeWorker {
    /// Routes frames until `shutdown` flips to `true` or every producer
    /// handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("routing worker started");
        loop {
            tokio::select! {
                frame = self.rx.recv() => {
                    let Some(frame) = frame else { break };
                    self.router.route(&frame);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("routing worker stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Router {
    config: RouterConfig,
    codec: NativeCodec,
    sessions: Arc<SessionRegistry>,
    positions: Arc<PositionTracker>,
    groups: Arc<GroupManager>,
    stats: Arc<RouterStats>,
}

impl Router {
    fn route(&self, frame: &AudioFrame) {
        self.fan_out(frame);
        RouterStats::bump(&self.stats.processed);
    }

    fn fan_out(&self, frame: &AudioFrame) {
        let sessions = self.sessions.snapshot();
        let recipients: Vec<&(SessionId, PeerTransport)> = match self.config.mode {
            RoutingMode::Proximity => {
                let sender_pos = self.positions.get(frame.sender);
                if sender_pos.is_none() && self.config.no_position == NoPositionPolicy::Drop {
                    RouterStats::bump(&self.stats.dropped_no_position);
                    return;
                }
                sessions
                    .iter()
                    .filter(|(id, _)| *id != frame.sender)
                    .filter(|(id, _)| {
                        hears(
                            sender_pos.as_ref(),
                            self.positions.get(*id).as_ref(),
                            self.config.proximity_distance,
                            self.config.no_position,
                        )
                    })
                    .collect()
            }
            RoutingMode::Group => {
                if self.groups.group_of(frame.sender).is_none() {
                    RouterStats::bump(&self.stats.dropped_no_group);
                    return;
                }
                let peers: HashSet<SessionId> = self.groups.peers_of(frame.sender).into_iter().collect();
                sessions.iter().filter(|(id, _)| peers.contains(id)).collect()
            }
        };

        if recipients.is_empty() {
            return;
        }

        // Re-encoded at most once per frame, and only if a native peer
        // is among the recipients.
        let mut native_packet: Option<Vec<u8>> = None;

        for (id, transport) in recipients {
            if !transport.is_open() {
                RouterStats::bump(&self.stats.skipped_closed);
                continue;
            }
            let bytes: &[u8] = match transport.kind() {
                TransportKind::Browser => &frame.payload,
                TransportKind::Native => {
                    if native_packet.is_none() {
                        match self.codec.encode_audio(frame.sender, frame.sequence, &frame.payload) {
                            Ok(packet) => native_packet = Some(packet),
                            Err(e) => {
                                tracing::warn!(sender = %frame.sender, error = %e, "cannot re-encode frame");
                                RouterStats::bump(&self.stats.send_failures);
                                continue;
                            }
                        }
                    }
                    match native_packet.as_deref() {
                        Some(packet) => packet,
                        None => continue,
                    }
                }
            };
            self.deliver(*id, transport, bytes, frame.sequence);
        }
    }

    /// Sends to one recipient. Failures stay with that recipient.
    fn deliver(&self, id: SessionId, transport: &PeerTransport, bytes: &[u8], sequence: u32) {
        match transport.send(bytes) {
            Ok(()) => {
                RouterStats::bump(&self.stats.forwarded);
                self.sessions.record_sent(id, sequence);
            }
            Err(TransportError::Backpressured) => {
                RouterStats::bump(&self.stats.skipped_backpressure);
            }
            Err(TransportError::Closed(_)) => {
                RouterStats::bump(&self.stats.skipped_closed);
            }
            Err(e) => {
                RouterStats::bump(&self.stats.send_failures);
                tracing::debug!(recipient = %id, error = %e, "audio send failed");
            }
        }
    }
}
