//! The `game_state` contract.
//!
//! A [`GameSnapshot`] is rendered per recipient: `hand` is populated only on
//! the recipient's own [`PlayerView`], and round secrets (card owners, vote
//! counts, the storyteller card) stay hidden until the round completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    BotDifficulty, CardId, ChatKind, ChatMessageId, ChatPhase, ParticipantId,
    RoomCode, RoomId, RoomStatus, RoundId, RoundPhase,
};

/// One seat as seen by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: ParticipantId,
    pub name: String,
    pub score: u32,
    pub position: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Vec<CardId>>,
    pub is_connected: bool,
    pub is_active: bool,
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_level: Option<BotDifficulty>,
    pub was_replaced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<ParticipantId>,
}

/// A card in reveal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealedCard {
    pub card_id: CardId,
    /// `None` until the round completes.
    pub owner_id: Option<ParticipantId>,
    pub vote_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub id: RoundId,
    pub round_number: u32,
    pub storyteller_id: ParticipantId,
    pub clue: String,
    pub status: RoundPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyteller_card: Option<CardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_cards: Option<Vec<RevealedCard>>,
    /// Participants who have submitted a card this round.
    pub submitted: Vec<ParticipantId>,
    /// Participants who have voted this round.
    pub voted: Vec<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub id: RoomId,
    pub room_code: RoomCode,
    pub status: RoomStatus,
    pub round_number: u32,
    /// Always `null`: games end on score or deck exhaustion, never on a cap.
    pub max_rounds: Option<u32>,
    /// Seat order.
    pub players: Vec<PlayerView>,
    pub current_round: Option<RoundView>,
    pub deck_size: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl GameSnapshot {
    /// Finds a player by id.
    pub fn player(&self, id: ParticipantId) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub id: ChatMessageId,
    pub room_id: RoomId,
    /// `None` for system messages.
    pub sender_id: Option<ParticipantId>,
    pub sender_name: Option<String>,
    pub message: String,
    pub message_type: ChatKind,
    pub phase: ChatPhase,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(hand: Option<Vec<CardId>>) -> PlayerView {
        PlayerView {
            id: ParticipantId::random(),
            name: "Alice".into(),
            score: 0,
            position: 1,
            hand,
            is_connected: true,
            is_active: true,
            is_bot: false,
            bot_level: None,
            was_replaced: false,
            replacement_id: None,
        }
    }

    #[test]
    fn test_player_view_omits_hidden_hand() {
        let json = serde_json::to_value(player(None)).unwrap();
        assert!(json.get("hand").is_none());
        assert!(json.get("bot_level").is_none());
    }

    #[test]
    fn test_player_view_includes_own_hand() {
        let json = serde_json::to_value(player(Some(vec![CardId(3), CardId(9)]))).unwrap();
        assert_eq!(json["hand"], serde_json::json!([3, 9]));
    }

    #[test]
    fn test_snapshot_max_rounds_is_null() {
        let now = Utc::now();
        let snap = GameSnapshot {
            id: RoomId::random(),
            room_code: RoomCode::from("ABC123"),
            status: RoomStatus::Waiting,
            round_number: 0,
            max_rounds: None,
            players: vec![player(None)],
            current_round: None,
            deck_size: 84,
            created_at: now,
            last_activity: now,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["max_rounds"].is_null());
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["deck_size"], 84);

        let id = snap.players[0].id;
        assert_eq!(snap.player(id).map(|p| p.position), Some(1));
    }
}
