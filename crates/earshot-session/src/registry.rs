//! The session registry: every live (or resumable) voice participant.
//!
//! Responsibilities:
//! - Admitting sessions after a handshake, enforcing one live session per
//!   identity
//! - Swapping a session's transport on resume
//! - Tracking activity for idle sweeps
//! - Handing the router an immutable snapshot of live transports
//!
//! # Concurrency note
//!
//! Unlike a single-owner map, the registry is read by the routing worker
//! while connection handlers and the native receive loop mutate it. It is
//! a `DashMap`, so every method is safe to call from any task without
//! external locking, and each method is one atomic step for its key.
//! Callers never see the map itself, only clones and snapshots.

use std::net::SocketAddr;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use earshot_protocol::SessionId;
use earshot_transport::{BrowserChannel, PeerTransport};
use tokio::time::Instant;

use crate::{ClientSession, SessionError, SessionState};

/// What [`SessionRegistry::admit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new session was registered (or replaced a dropped one).
    Admitted,
    /// The same client repeated its handshake; nothing changed.
    Reacknowledged,
}

/// Registry of sessions keyed by identity.
///
/// ```text
/// admit() ──→ [PendingAck] ──mark_connected()──→ [Connected]
///                                                    │  ↑
///                                   detach_browser() │  │ replace_transport()
///                                                    ▼  │
///                                              [Disconnected] ──remove()──→ gone
/// ```
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authenticated session.
    ///
    /// - No existing entry, or a `Disconnected` one → the new session
    ///   replaces it.
    /// - A live native entry from the same address → `Reacknowledged`
    ///   (the client lost our ack and asked again).
    /// - Any other live entry → rejected.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyConnected`] if a different client
    /// already holds this identity.
    pub fn admit(
        &self,
        id: SessionId,
        display_name: impl Into<String>,
        transport: PeerTransport,
    ) -> Result<Admission, SessionError> {
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.state.is_live() {
                    let same_client = matches!(
                        (existing.transport.native_addr(), transport.native_addr()),
                        (Some(a), Some(b)) if a == b
                    );
                    if !same_client {
                        return Err(SessionError::AlreadyConnected(id));
                    }
                    existing.last_activity = Instant::now();
                    tracing::debug!(%id, "handshake repeated by the same client");
                    return Ok(Admission::Reacknowledged);
                }
                let old = entry.insert(ClientSession::new(id, display_name.into(), transport));
                old.transport.close();
                tracing::info!(%id, "session re-admitted over a dropped one");
                Ok(Admission::Admitted)
            }
            Entry::Vacant(entry) => {
                let session = ClientSession::new(id, display_name.into(), transport);
                tracing::info!(%id, name = %session.display_name, kind = ?session.transport.kind(), "session admitted");
                entry.insert(session);
                Ok(Admission::Admitted)
            }
        }
    }

    /// Swaps in a new transport for a resumed session and marks it
    /// `Connected`. The old transport is closed.
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if the session is gone.
    pub fn replace_transport(
        &self,
        id: SessionId,
        transport: PeerTransport,
    ) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;
        let old = std::mem::replace(&mut session.transport, transport);
        old.close();
        session.state = SessionState::Connected;
        session.last_activity = Instant::now();
        tracing::info!(%id, "session transport replaced");
        Ok(())
    }

    /// Marks a browser session `Disconnected` if `channel` is still its
    /// transport.
    ///
    /// A handler whose channel was already replaced by a resume must not
    /// knock the resumed session offline, hence the identity check.
    /// Returns whether the session was detached.
    pub fn detach_browser(&self, id: SessionId, channel: &BrowserChannel) -> bool {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return false;
        };
        let current = match session.transport.as_browser() {
            Some(current) => current.same_channel(channel),
            None => false,
        };
        if !current || !session.state.is_live() {
            return false;
        }
        session.transport.close();
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        tracing::info!(%id, "browser transport lost, session resumable");
        true
    }

    /// Promotes a `PendingAck` session to `Connected`. Returns `true` on
    /// the transition.
    pub fn mark_connected(&self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.state == SessionState::PendingAck => {
                session.state = SessionState::Connected;
                tracing::debug!(%id, "session connected");
                true
            }
            _ => false,
        }
    }

    /// Removes a session and closes its transport.
    pub fn remove(&self, id: SessionId) -> Option<ClientSession> {
        let (_, session) = self.sessions.remove(&id)?;
        session.transport.close();
        Some(session)
    }

    /// A clone of the session, if present.
    pub fn get(&self, id: SessionId) -> Option<ClientSession> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Whether the session exists and is live.
    pub fn is_connected(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|s| s.state.is_live())
    }

    /// Whether a native session's registered address is `addr`.
    pub fn endpoint_matches(&self, id: SessionId, addr: SocketAddr) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|s| s.transport.native_addr() == Some(addr))
    }

    /// Transports of every live session, copied out.
    ///
    /// Mutations after the call don't show up in the returned vector.
    pub fn snapshot(&self) -> Vec<(SessionId, PeerTransport)> {
        self.sessions
            .iter()
            .filter(|entry| entry.state.is_live())
            .map(|entry| (*entry.key(), entry.transport.clone()))
            .collect()
    }

    /// Records activity and the inbound sequence number.
    pub fn record_seen(&self, id: SessionId, sequence: u32) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_sequence_seen = sequence;
            session.last_activity = Instant::now();
        }
    }

    /// Records the last sequence number forwarded to `id`.
    pub fn record_sent(&self, id: SessionId, sequence: u32) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_sequence_sent = sequence;
        }
    }

    /// Records activity without a sequence number (e.g. a heartbeat).
    pub fn touch(&self, id: SessionId) {
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.last_activity = Instant::now();
        }
    }

    /// Native sessions that have been silent for longer than `timeout`.
    pub fn idle_native_sessions(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.transport.native_addr().is_some())
            .filter(|entry| entry.last_activity.elapsed() > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes every transport and forgets every session.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.transport.close();
        }
        self.sessions.clear();
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming follows `test_{function}_{scenario}_{expected}`.

    use std::sync::Arc;

    use earshot_transport::NativeEndpoint;
    use tokio::net::UdpSocket;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    async fn socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    fn native(socket: &Arc<UdpSocket>, port: u16) -> PeerTransport {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        PeerTransport::Native(NativeEndpoint::new(Arc::clone(socket), addr))
    }

    fn browser() -> (PeerTransport, BrowserChannel, tokio::sync::mpsc::Receiver<earshot_transport::Frame>) {
        let (channel, rx) = BrowserChannel::new(8);
        (PeerTransport::Browser(channel.clone()), channel, rx)
    }

    // =====================================================================
    // admit()
    // =====================================================================

    #[tokio::test]
    async fn test_admit_native_starts_pending_ack() {
        let reg = SessionRegistry::new();
        let sock = socket().await;

        let result = reg.admit(sid(1), "alice", native(&sock, 4000));

        assert_eq!(result.unwrap(), Admission::Admitted);
        let session = reg.get(sid(1)).unwrap();
        assert_eq!(session.state, SessionState::PendingAck);
        assert!(session.authenticated);
        assert_eq!(session.display_name, "alice");
    }

    #[tokio::test]
    async fn test_admit_browser_starts_connected() {
        let reg = SessionRegistry::new();
        let (transport, _channel, _rx) = browser();

        reg.admit(sid(1), "web", transport).unwrap();

        assert_eq!(reg.get(sid(1)).unwrap().state, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_admit_same_address_is_reacknowledged() {
        let reg = SessionRegistry::new();
        let sock = socket().await;
        reg.admit(sid(1), "alice", native(&sock, 4000)).unwrap();

        let result = reg.admit(sid(1), "alice", native(&sock, 4000));

        assert_eq!(result.unwrap(), Admission::Reacknowledged);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_admit_live_identity_from_other_address_is_rejected() {
        let reg = SessionRegistry::new();
        let sock = socket().await;
        reg.admit(sid(1), "alice", native(&sock, 4000)).unwrap();

        let result = reg.admit(sid(1), "mallory", native(&sock, 4001));

        assert!(matches!(result, Err(SessionError::AlreadyConnected(id)) if id == sid(1)));
        assert!(reg.endpoint_matches(sid(1), "127.0.0.1:4000".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_admit_replaces_disconnected_session() {
        let reg = SessionRegistry::new();
        let (transport, channel, _rx) = browser();
        reg.admit(sid(1), "web", transport).unwrap();
        assert!(reg.detach_browser(sid(1), &channel));

        let (again, _c2, _rx2) = browser();
        let result = reg.admit(sid(1), "web", again);

        assert_eq!(result.unwrap(), Admission::Admitted);
        assert!(reg.is_connected(sid(1)));
    }

    // =====================================================================
    // detach_browser() / replace_transport()
    // =====================================================================

    #[tokio::test]
    async fn test_detach_browser_marks_disconnected_and_hides_from_snapshot() {
        let reg = SessionRegistry::new();
        let (transport, channel, _rx) = browser();
        reg.admit(sid(1), "web", transport).unwrap();

        assert!(reg.detach_browser(sid(1), &channel));

        assert!(!reg.is_connected(sid(1)));
        assert!(reg.contains(sid(1)), "resumable sessions stay registered");
        assert!(reg.snapshot().is_empty());
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_detach_browser_with_superseded_channel_is_noop() {
        let reg = SessionRegistry::new();
        let (first, first_channel, _rx1) = browser();
        reg.admit(sid(1), "web", first).unwrap();
        let (second, second_channel, _rx2) = browser();
        reg.replace_transport(sid(1), second).unwrap();

        // The old connection's handler noticing its socket closed must not
        // take the resumed session down.
        assert!(!reg.detach_browser(sid(1), &first_channel));

        assert!(reg.is_connected(sid(1)));
        assert!(second_channel.is_open());
        assert!(!first_channel.is_open(), "replaced transport is closed");
    }

    #[tokio::test]
    async fn test_replace_transport_restores_connected_without_duplicate() {
        let reg = SessionRegistry::new();
        let (first, channel, _rx) = browser();
        reg.admit(sid(1), "web", first).unwrap();
        reg.detach_browser(sid(1), &channel);

        let (second, _c2, _rx2) = browser();
        reg.replace_transport(sid(1), second).unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(sid(1)).unwrap().state, SessionState::Connected);
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn test_replace_transport_unknown_returns_not_found() {
        let reg = SessionRegistry::new();
        let (transport, _channel, _rx) = browser();

        let result = reg.replace_transport(sid(9), transport);

        assert!(matches!(result, Err(SessionError::NotFound(id)) if id == sid(9)));
    }

    // =====================================================================
    // mark_connected() / record_*()
    // =====================================================================

    #[tokio::test]
    async fn test_mark_connected_promotes_pending_once() {
        let reg = SessionRegistry::new();
        let sock = socket().await;
        reg.admit(sid(1), "alice", native(&sock, 4000)).unwrap();

        assert!(reg.mark_connected(sid(1)));
        assert!(!reg.mark_connected(sid(1)));
        assert_eq!(reg.get(sid(1)).unwrap().state, SessionState::Connected);
    }

    #[tokio::test]
    async fn test_record_seen_and_sent_update_counters() {
        let reg = SessionRegistry::new();
        let sock = socket().await;
        reg.admit(sid(1), "alice", native(&sock, 4000)).unwrap();

        reg.record_seen(sid(1), 41);
        reg.record_sent(sid(1), 7);

        let session = reg.get(sid(1)).unwrap();
        assert_eq!(session.last_sequence_seen, 41);
        assert_eq!(session.last_sequence_sent, 7);
    }

    // =====================================================================
    // idle_native_sessions()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_idle_native_sessions_lists_silent_native_only() {
        let reg = SessionRegistry::new();
        let sock = socket().await;
        reg.admit(sid(1), "quiet", native(&sock, 4000)).unwrap();
        reg.admit(sid(2), "chatty", native(&sock, 4001)).unwrap();
        let (web, _channel, _rx) = browser();
        reg.admit(sid(3), "web", web).unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        reg.record_seen(sid(2), 1);
        tokio::time::advance(Duration::from_secs(15)).await;

        let idle = reg.idle_native_sessions(Duration::from_secs(30));
        assert_eq!(idle, vec![sid(1)]);
    }

    // =====================================================================
    // remove() / shutdown()
    // =====================================================================

    #[test]
    fn test_remove_closes_transport() {
        let reg = SessionRegistry::new();
        let (transport, channel, _rx) = browser();
        reg.admit(sid(1), "web", transport).unwrap();

        let removed = reg.remove(sid(1));

        assert!(removed.is_some());
        assert!(!channel.is_open());
        assert!(reg.remove(sid(1)).is_none(), "second remove is a no-op");
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let reg = SessionRegistry::new();
        let (a, ca, _ra) = browser();
        let (b, cb, _rb) = browser();
        reg.admit(sid(1), "a", a).unwrap();
        reg.admit(sid(2), "b", b).unwrap();

        reg.shutdown();

        assert!(reg.is_empty());
        assert!(!ca.is_open() && !cb.is_open());
    }
}
