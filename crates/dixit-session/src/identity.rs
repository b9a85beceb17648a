//! The identity bound to a connection.

use dixit_protocol::{AuthType, ConnectionEstablished, ParticipantId, ServerEvent};

use crate::SessionError;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 32;

/// Who is on the other end of a socket.
///
/// The server never trusts identity fields in message payloads; every
/// action is attributed to the `Identity` established at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: ParticipantId,
    pub player_name: String,
    pub auth_type: AuthType,
    pub authenticated: bool,
}

impl Identity {
    /// The `connection_established` event announcing this identity.
    pub fn welcome(&self) -> ServerEvent {
        ServerEvent::ConnectionEstablished(ConnectionEstablished {
            player_id: self.player_id,
            player_name: self.player_name.clone(),
            auth_type: self.auth_type,
            authenticated: self.authenticated,
        })
    }
}

/// Trims a requested display name and checks it is printable and short.
///
/// Returns `Ok(None)` when nothing usable was supplied.
pub(crate) fn normalize_name(raw: Option<&str>) -> Result<Option<String>, SessionError> {
    let Some(name) = raw.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_NAME_LEN {
        return Err(SessionError::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::InvalidName(
            "name contains control characters".into(),
        ));
    }
    Ok(Some(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_trims() {
        assert_eq!(normalize_name(Some("  Alice ")).unwrap().as_deref(), Some("Alice"));
    }

    #[test]
    fn test_normalize_name_blank_is_none() {
        assert_eq!(normalize_name(Some("   ")).unwrap(), None);
        assert_eq!(normalize_name(None).unwrap(), None);
    }

    #[test]
    fn test_normalize_name_rejects_long_names() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            normalize_name(Some(&long)),
            Err(SessionError::InvalidName(_))
        ));
    }

    #[test]
    fn test_normalize_name_rejects_control_chars() {
        assert!(normalize_name(Some("Al\u{7}ice")).is_err());
    }

    #[test]
    fn test_welcome_carries_identity() {
        let identity = Identity {
            player_id: ParticipantId::random(),
            player_name: "Alice".into(),
            auth_type: AuthType::Guest,
            authenticated: false,
        };
        let ServerEvent::ConnectionEstablished(body) = identity.welcome() else {
            panic!("expected connection_established");
        };
        assert_eq!(body.player_id, identity.player_id);
        assert_eq!(body.player_name, "Alice");
    }
}
