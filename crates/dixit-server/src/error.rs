//! Unified error type for the server edge.

use dixit_protocol::ProtocolError;
use dixit_room::RoomError;
use dixit_session::SessionError;
use dixit_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// Room validation failures normally go back to the client as `error`
/// events and never reach this type; it carries what ends a connection or
/// stops the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding, accepting, sending or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection's credentials were rejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: ServerError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, ServerError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: ServerError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err: ServerError = SessionError::AuthFailed("nope".into()).into();
        assert!(matches!(err, ServerError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err: ServerError = RoomError::GameNotFound.into();
        assert!(matches!(err, ServerError::Room(_)));
        assert_eq!(err.to_string(), "game not found");
    }
}
