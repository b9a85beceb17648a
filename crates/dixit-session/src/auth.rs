//! Authentication hook for validating player identity.
//!
//! The server doesn't issue tokens itself. It defines the [`Authenticator`]
//! trait: a single async method that takes the connection's
//! [`Credentials`] and returns an [`Identity`] or an error. The edge calls
//! it once per socket, before any message is read.
//!
//! [`GuestAuthenticator`] is the default: anyone may play, optionally
//! resuming a previous participant id so a reconnecting browser tab lands
//! back in its seat.

use dixit_protocol::{AuthType, ParticipantId};
use rand::Rng;
use uuid::Uuid;

use crate::identity::normalize_name;
use crate::{Credentials, Identity, SessionError};

/// Validates a client's credentials and returns their identity.
///
/// # Example
///
/// ```rust
/// use dixit_protocol::{AuthType, ParticipantId};
/// use dixit_session::{Authenticator, Credentials, Identity, SessionError};
///
/// /// Accepts exactly one shared secret.
/// struct SharedSecret(&'static str);
///
/// impl Authenticator for SharedSecret {
///     async fn authenticate(
///         &self,
///         creds: &Credentials,
///     ) -> Result<Identity, SessionError> {
///         if creds.token.as_deref() != Some(self.0) {
///             return Err(SessionError::AuthFailed("bad token".into()));
///         }
///         Ok(Identity {
///             player_id: ParticipantId::random(),
///             player_name: creds.player_name.clone().unwrap_or_default(),
///             auth_type: AuthType::Token,
///             authenticated: true,
///         })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given credentials and returns the player's identity.
    ///
    /// # Returns
    /// - `Ok(Identity)`: the connection is bound to this identity
    /// - `Err(SessionError)`: the socket is closed with an `error` event
    fn authenticate(
        &self,
        creds: &Credentials,
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}

/// Accepts every connection as an unauthenticated guest.
///
/// A well-formed `player_id` UUID is honoured so a client can resume its
/// previous identity; anything else gets a fresh id. Missing names become
/// `Guest-NNNN`. Tokens are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestAuthenticator;

impl Authenticator for GuestAuthenticator {
    async fn authenticate(&self, creds: &Credentials) -> Result<Identity, SessionError> {
        let player_id = creds
            .player_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(ParticipantId)
            .unwrap_or_else(ParticipantId::random);

        let player_name = match normalize_name(creds.player_name.as_deref())? {
            Some(name) => name,
            None => format!("Guest-{}", rand::rng().random_range(1000..10000)),
        };

        tracing::debug!(%player_id, %player_name, "guest authenticated");
        Ok(Identity {
            player_id,
            player_name,
            auth_type: AuthType::Guest,
            authenticated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guest_uses_supplied_name() {
        let creds = Credentials::from_query(Some("player_name=Alice"));
        let identity = GuestAuthenticator.authenticate(&creds).await.unwrap();
        assert_eq!(identity.player_name, "Alice");
        assert_eq!(identity.auth_type, AuthType::Guest);
        assert!(!identity.authenticated);
    }

    #[tokio::test]
    async fn test_guest_resumes_valid_player_id() {
        let id = Uuid::new_v4();
        let creds = Credentials::from_query(Some(&format!("player_id={id}&player_name=Bob")));
        let identity = GuestAuthenticator.authenticate(&creds).await.unwrap();
        assert_eq!(identity.player_id, ParticipantId(id));
    }

    #[tokio::test]
    async fn test_guest_ignores_malformed_player_id() {
        let creds = Credentials::from_query(Some("player_id=not-a-uuid"));
        let identity = GuestAuthenticator.authenticate(&creds).await.unwrap();
        assert_ne!(identity.player_id.0.to_string(), "not-a-uuid");
    }

    #[tokio::test]
    async fn test_guest_generates_name_when_missing() {
        let identity = GuestAuthenticator
            .authenticate(&Credentials::default())
            .await
            .unwrap();
        assert!(identity.player_name.starts_with("Guest-"));
        assert_eq!(identity.player_name.len(), "Guest-".len() + 4);
    }

    #[tokio::test]
    async fn test_guest_rejects_overlong_name() {
        let creds = Credentials {
            player_name: Some("n".repeat(64)),
            ..Credentials::default()
        };
        let result = GuestAuthenticator.authenticate(&creds).await;
        assert!(matches!(result, Err(SessionError::InvalidName(_))));
    }
}
