//! Resume tokens for browser sessions.
//!
//! A browser tab that loses its WebSocket can come back within the resume
//! window and present `(sessionId, resumeToken)` instead of
//! re-authenticating. Its identity, group membership, and position are
//! still there because nothing tore them down yet.
//!
//! One [`ResumeRecord`] per identity. Every successful authenticate or
//! resume reissues it (new token, refreshed expiry), so an older token
//! stops working the moment a newer one exists.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use earshot_protocol::SessionId;
use rand::Rng;
use tokio::time::Instant;

use crate::{SessionConfig, SessionError};

/// The outstanding resume secret for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRecord {
    pub token: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// Issues and checks resume tokens.
#[derive(Debug)]
pub struct ResumeManager {
    records: DashMap<SessionId, ResumeRecord>,
    config: SessionConfig,
}

impl ResumeManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The resume window, in milliseconds, as announced to clients.
    pub fn resume_window_ms(&self) -> u64 {
        duration_ms(self.config.resume_window)
    }

    /// The heartbeat interval, in milliseconds, as announced to clients.
    pub fn heartbeat_interval_ms(&self) -> u64 {
        duration_ms(self.config.heartbeat_interval)
    }

    /// Issues a fresh token for `id`, superseding any previous one.
    pub fn issue(&self, id: SessionId) -> String {
        let record = self.new_record();
        let token = record.token.clone();
        self.records.insert(id, record);
        tracing::debug!(%id, "resume token issued");
        token
    }

    /// Checks a resume attempt and, on success, reissues the record.
    ///
    /// Returns the new token.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: no record, or a token that
    ///   doesn't match the current one
    /// - [`SessionError::SessionExpired`]: the window closed; the record
    ///   is removed and cannot be revived
    pub fn validate(&self, id: SessionId, token: &str) -> Result<String, SessionError> {
        let Entry::Occupied(mut entry) = self.records.entry(id) else {
            return Err(SessionError::InvalidToken);
        };

        if Instant::now() > entry.get().expires_at {
            entry.remove();
            tracing::info!(%id, "resume rejected, window elapsed");
            return Err(SessionError::SessionExpired(id));
        }
        if entry.get().token != token {
            tracing::warn!(%id, "resume rejected, token mismatch");
            return Err(SessionError::InvalidToken);
        }

        let record = self.new_record();
        let token = record.token.clone();
        entry.insert(record);
        tracing::info!(%id, "session resumed");
        Ok(token)
    }

    /// Pushes the expiry out to a full window from now.
    ///
    /// Called on heartbeat while connected and again when the transport
    /// drops, which is when the resume window actually starts.
    pub fn refresh(&self, id: SessionId) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                record.expires_at = Instant::now() + self.config.resume_window;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<ResumeRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn remove(&self, id: SessionId) -> bool {
        self.records.remove(&id).is_some()
    }

    /// Identities whose record is past `expires_at`. Read-only: the caller
    /// decides whether each session is torn down.
    pub fn expired(&self) -> Vec<SessionId> {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| now > entry.expires_at)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn shutdown(&self) {
        self.records.clear();
    }

    fn new_record(&self) -> ResumeRecord {
        let issued_at = Instant::now();
        ResumeRecord {
            token: generate_token(),
            issued_at,
            expires_at: issued_at + self.config.resume_window,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A random 32-character hex string (128 bits).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Expiry is tested on tokio's paused clock: `advance` moves
    //! `Instant::now()` exactly, so "29 seconds later" is deterministic.

    use super::*;

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    fn manager() -> ResumeManager {
        ResumeManager::new(SessionConfig::default())
    }

    #[test]
    fn test_issue_returns_hex_token() {
        let mgr = manager();

        let token = mgr.issue(sid(1));

        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_issue_twice_supersedes_first_token() {
        let mgr = manager();
        let first = mgr.issue(sid(1));
        let second = mgr.issue(sid(1));

        assert_ne!(first, second);
        assert!(matches!(mgr.validate(sid(1), &first), Err(SessionError::InvalidToken)));
        assert!(mgr.validate(sid(1), &second).is_ok());
    }

    #[test]
    fn test_validate_unknown_session_is_invalid() {
        let mgr = manager();
        assert!(matches!(mgr.validate(sid(1), "x"), Err(SessionError::InvalidToken)));
    }

    #[test]
    fn test_validate_wrong_token_keeps_record() {
        let mgr = manager();
        let token = mgr.issue(sid(1));

        assert!(mgr.validate(sid(1), "nope").is_err());

        assert!(mgr.validate(sid(1), &token).is_ok(), "a bad guess doesn't burn the real token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_within_window_then_after_window() {
        // Issued at t=0 with a 30s window, connection drops at t=0.
        let mgr = manager();
        let token = mgr.issue(sid(1));
        mgr.refresh(sid(1));

        tokio::time::advance(Duration::from_millis(29_000)).await;
        let renewed = mgr.validate(sid(1), &token).expect("resume at 29s succeeds");
        assert_ne!(renewed, token, "resume reissues the token");

        // The original token is superseded, whatever the clock says.
        tokio::time::advance(Duration::from_millis(2_000)).await;
        assert!(mgr.validate(sid(1), &token).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_after_expiry_removes_record() {
        let mgr = manager();
        let token = mgr.issue(sid(1));

        tokio::time::advance(Duration::from_millis(31_000)).await;
        let result = mgr.validate(sid(1), &token);

        assert!(matches!(result, Err(SessionError::SessionExpired(id)) if id == sid(1)));
        assert!(mgr.get(sid(1)).is_none(), "expired record is not kept around");
        assert!(matches!(mgr.validate(sid(1), &token), Err(SessionError::InvalidToken)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_expiry() {
        let mgr = manager();
        let token = mgr.issue(sid(1));

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(mgr.refresh(sid(1)));
        tokio::time::advance(Duration::from_secs(25)).await;

        assert!(mgr.validate(sid(1), &token).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lists_only_elapsed_records() {
        let mgr = manager();
        mgr.issue(sid(1));
        tokio::time::advance(Duration::from_secs(20)).await;
        mgr.issue(sid(2));
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(mgr.expired(), vec![sid(1)]);
        assert_eq!(mgr.len(), 2, "expired() doesn't remove");
    }

    #[test]
    fn test_announced_intervals_in_ms() {
        let mgr = manager();
        assert_eq!(mgr.resume_window_ms(), 30_000);
        assert_eq!(mgr.heartbeat_interval_ms(), 5_000);
    }

    #[test]
    fn test_shutdown_forgets_tokens() {
        let mgr = manager();
        let token = mgr.issue(sid(1));

        mgr.shutdown();

        assert!(mgr.is_empty());
        assert!(mgr.validate(sid(1), &token).is_err());
    }
}
