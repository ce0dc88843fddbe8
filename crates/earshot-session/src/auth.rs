//! Authentication hook for voice participants.
//!
//! Earshot doesn't own user accounts. The host (a game server plugin, a
//! web backend) knows who may talk, so it supplies an [`Authenticator`]:
//! one async method that takes what the client sent and returns the
//! display name to use, or an error.
//!
//! Both transports go through it. Native clients send only a username;
//! browser clients may also send an `authCode` (e.g. a one-time code the
//! player got in-game).

use crate::SessionError;

/// Validates a client's credentials and returns its display name.
///
/// # Example
///
/// ```rust
/// use earshot_session::{Authenticator, SessionError};
///
/// /// Only lets in names from a fixed list.
/// struct AllowList(Vec<String>);
///
/// impl Authenticator for AllowList {
///     async fn authenticate(
///         &self,
///         username: &str,
///         _auth_code: &str,
///     ) -> Result<String, SessionError> {
///         if self.0.iter().any(|n| n == username) {
///             Ok(username.to_string())
///         } else {
///             Err(SessionError::AuthFailed("not on the list".into()))
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Checks `username` (and `auth_code`, empty for native clients).
    ///
    /// # Returns
    /// - `Ok(display_name)`: admitted under this name
    /// - `Err(SessionError::AuthFailed)`: rejected, with a reason the
    ///   client will see
    fn authenticate(
        &self,
        username: &str,
        auth_code: &str,
    ) -> impl std::future::Future<Output = Result<String, SessionError>> + Send;
}

/// Admits anyone with a non-blank username. Ignores `auth_code`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAuthenticator;

impl Authenticator for OpenAuthenticator {
    async fn authenticate(&self, username: &str, _auth_code: &str) -> Result<String, SessionError> {
        let name = username.trim();
        if name.is_empty() {
            return Err(SessionError::AuthFailed("username must not be empty".into()));
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_authenticator_accepts_name() {
        let name = OpenAuthenticator.authenticate("  alice ", "").await.unwrap();
        assert_eq!(name, "alice");
    }

    #[tokio::test]
    async fn test_open_authenticator_rejects_blank_name() {
        let result = OpenAuthenticator.authenticate("   ", "code").await;
        assert!(matches!(result, Err(SessionError::AuthFailed(_))));
    }
}
