//! Error types for the session layer.

/// Errors that can occur while establishing a connection's identity.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The display name is too long or contains control characters.
    #[error("invalid player name: {0}")]
    InvalidName(String),
}
