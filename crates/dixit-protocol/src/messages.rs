//! Client messages and server events.
//!
//! Every frame on the socket is a JSON object with exactly two fields:
//!
//! ```text
//! { "type": "submit_card", "payload": { "room_code": "ABC123", "card_id": 12 } }
//! ```
//!
//! Serde's adjacently-tagged representation (`tag = "type"`,
//! `content = "payload"`) produces that shape directly from the enums below,
//! so adding a message means adding a variant and nothing else.

use serde::{Deserialize, Serialize};

use crate::snapshot::{ChatMessageView, GameSnapshot, PlayerView, RevealedCard};
use crate::types::{
    AuthType, BotDifficulty, CardId, ChatHistoryFilter, ChatKind, ParticipantId,
    RoomCode, RoundId,
};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A payload that only names the room it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRef {
    pub room_code: RoomCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGame {
    pub room_code: RoomCode,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinGame {
    pub room_code: RoomCode,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitClue {
    pub room_code: RoomCode,
    pub clue: String,
    pub card_id: CardId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitCard {
    pub room_code: RoomCode,
    pub card_id: CardId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitVote {
    pub room_code: RoomCode,
    pub card_id: CardId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChat {
    pub room_code: RoomCode,
    pub message: String,
    /// `chat` when absent.
    #[serde(default)]
    pub message_type: Option<ChatKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChatHistory {
    pub room_code: RoomCode,
    /// `all` when absent.
    #[serde(default)]
    pub phase: Option<ChatHistoryFilter>,
    /// Clamped to `1..=100` by the room; 50 when absent.
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddBot {
    pub room_code: RoomCode,
    #[serde(default)]
    pub difficulty: Option<BotDifficulty>,
}

/// Everything a client may send.
///
/// The server never trusts identity fields from the payload: the acting
/// participant is always the one bound to the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateGame(CreateGame),
    JoinGame(JoinGame),
    StartGame(RoomRef),
    SubmitClue(SubmitClue),
    SubmitCard(SubmitCard),
    SubmitVote(SubmitVote),
    LeaveGame(RoomRef),
    SendChat(SendChat),
    GetChatHistory(GetChatHistory),
    AddBot(AddBot),
    DeleteGame(RoomRef),
    GetGameState(RoomRef),
}

impl ClientMessage {
    /// The room this message is addressed to.
    pub fn room_code(&self) -> &RoomCode {
        match self {
            Self::CreateGame(m) => &m.room_code,
            Self::JoinGame(m) => &m.room_code,
            Self::SubmitClue(m) => &m.room_code,
            Self::SubmitCard(m) => &m.room_code,
            Self::SubmitVote(m) => &m.room_code,
            Self::SendChat(m) => &m.room_code,
            Self::GetChatHistory(m) => &m.room_code,
            Self::AddBot(m) => &m.room_code,
            Self::StartGame(m)
            | Self::LeaveGame(m)
            | Self::DeleteGame(m)
            | Self::GetGameState(m) => &m.room_code,
        }
    }

    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateGame(_) => "create_game",
            Self::JoinGame(_) => "join_game",
            Self::StartGame(_) => "start_game",
            Self::SubmitClue(_) => "submit_clue",
            Self::SubmitCard(_) => "submit_card",
            Self::SubmitVote(_) => "submit_vote",
            Self::LeaveGame(_) => "leave_game",
            Self::SendChat(_) => "send_chat",
            Self::GetChatHistory(_) => "get_chat_history",
            Self::AddBot(_) => "add_bot",
            Self::DeleteGame(_) => "delete_game",
            Self::GetGameState(_) => "get_game_state",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    pub player_id: ParticipantId,
    pub player_name: String,
    pub auth_type: AuthType,
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub player: PlayerView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub player_id: ParticipantId,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReplaced {
    pub replaced_id: ParticipantId,
    pub replaced_name: String,
    pub bot: PlayerView,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStarted {
    pub room_code: RoomCode,
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStarted {
    pub round_id: RoundId,
    pub round_number: u32,
    pub storyteller_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClueSubmitted {
    pub round_number: u32,
    pub storyteller_id: ParticipantId,
    pub clue: String,
}

/// Progress notice; never reveals which card was played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSubmitted {
    pub player_id: ParticipantId,
    pub submitted: u32,
    pub expected: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingStarted {
    pub round_number: u32,
    /// Reveal order. Owners stay hidden until the round completes.
    pub cards: Vec<CardId>,
}

/// Progress notice; never reveals which card was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSubmitted {
    pub player_id: ParticipantId,
    pub votes: u32,
    pub expected: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteView {
    pub voter_id: ParticipantId,
    pub card_id: CardId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub player_id: ParticipantId,
    pub gained: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundCompleted {
    pub round_number: u32,
    pub storyteller_id: ParticipantId,
    pub storyteller_card: CardId,
    pub revealed_cards: Vec<RevealedCard>,
    pub votes: Vec<VoteView>,
    pub score_changes: Vec<ScoreChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub player_id: ParticipantId,
    pub player_name: String,
    pub score: u32,
    pub position: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCompleted {
    pub winner_id: ParticipantId,
    pub final_scores: Vec<FinalScore>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDeleted {
    pub room_code: RoomCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub room_code: RoomCode,
    /// Oldest first.
    pub messages: Vec<ChatMessageView>,
}

/// Body of an `error` event. `code` is a stable snake_case identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Everything the server may push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished(ConnectionEstablished),
    PlayerJoined(PlayerJoined),
    PlayerLeft(PlayerLeft),
    PlayerReplaced(PlayerReplaced),
    GameStarted(GameStarted),
    RoundStarted(RoundStarted),
    ClueSubmitted(ClueSubmitted),
    CardSubmitted(CardSubmitted),
    VotingStarted(VotingStarted),
    VoteSubmitted(VoteSubmitted),
    RoundCompleted(RoundCompleted),
    GameCompleted(GameCompleted),
    GameDeleted(GameDeleted),
    GameState(GameSnapshot),
    ChatMessage(ChatMessageView),
    ChatHistory(ChatHistory),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Builds an `error` event.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    /// The wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished(_) => "connection_established",
            Self::PlayerJoined(_) => "player_joined",
            Self::PlayerLeft(_) => "player_left",
            Self::PlayerReplaced(_) => "player_replaced",
            Self::GameStarted(_) => "game_started",
            Self::RoundStarted(_) => "round_started",
            Self::ClueSubmitted(_) => "clue_submitted",
            Self::CardSubmitted(_) => "card_submitted",
            Self::VotingStarted(_) => "voting_started",
            Self::VoteSubmitted(_) => "vote_submitted",
            Self::RoundCompleted(_) => "round_completed",
            Self::GameCompleted(_) => "game_completed",
            Self::GameDeleted(_) => "game_deleted",
            Self::GameState(_) => "game_state",
            Self::ChatMessage(_) => "chat_message",
            Self::ChatHistory(_) => "chat_history",
            Self::Error(_) => "error",
        }
    }
}
