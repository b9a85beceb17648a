//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" (coder/decoder) converts between Rust types and text frames.
//! The rest of the server does not care HOW messages are serialized: it
//! just needs something that implements [`Codec`]. Browsers speak JSON, so
//! [`JsonCodec`] is the only implementation shipped today.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to text frames and decode them back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the frame is malformed or does
    /// not match the expected shape.
    fn decode<T: DeserializeOwned>(
        &self,
        frame: &str,
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use dixit_protocol::{ClientMessage, Codec, JsonCodec, RoomCode, RoomRef};
///
/// let codec = JsonCodec;
/// let msg = ClientMessage::StartGame(RoomRef { room_code: RoomCode::from("ABC123") });
///
/// let frame = codec.encode(&msg).unwrap();
/// assert_eq!(frame, r#"{"type":"start_game","payload":{"room_code":"ABC123"}}"#);
///
/// let decoded: ClientMessage = codec.decode(&frame).unwrap();
/// assert_eq!(decoded, msg);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        frame: &str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerEvent};

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<ClientMessage, _> = JsonCodec.decode("not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_type_returns_error() {
        let frame = r#"{"type":"fly_to_moon","payload":{}}"#;
        let result: Result<ClientMessage, _> = JsonCodec.decode(frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_error_event() {
        let frame = JsonCodec
            .encode(&ServerEvent::error("room_full", "room is full"))
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["code"], "room_full");
        assert_eq!(json["payload"]["message"], "room is full");
    }
}
