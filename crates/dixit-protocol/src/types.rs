//! Identifiers and enums shared by every layer of the server.
//!
//! Everything in this module appears on the wire at some point, so the serde
//! attributes here ARE the protocol: identifiers serialize as plain values,
//! enums as snake_case strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a seat holder (human or bot) in a room.
///
/// Newtype over a v4 UUID. `#[serde(transparent)]` makes it serialize as
/// the bare UUID string rather than `{"0": "..."}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The durable identifier of a room. Distinct from the human-facing
/// [`RoomCode`], which may be reused once a room is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one round inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub Uuid);

impl RoundId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatMessageId(pub Uuid);

impl ChatMessageId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// A card from the external catalog, numbered `1..=N`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CardId(pub u32);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The human-facing room code players type to join, e.g. `ABC123`.
///
/// Case-sensitive: `abc123` and `ABC123` are different rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Wraps a code string as-is.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrows the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for RoomCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RoomStatus
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Waiting ──start──→ InProgress ──end condition──→ Completed
///    │                    │
///    └──delete──→ Abandoned ←──AFK / timeout──┘
/// ```
///
/// Status never moves backwards; `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Completed,
    Abandoned,
}

impl RoomStatus {
    /// Returns `true` if the room accepts joins and bot additions.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` once the room can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Returns `true` if moving from `self` to `target` is a legal step.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::InProgress)
                | (Self::Waiting, Self::Abandoned)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Abandoned)
        )
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

// ---------------------------------------------------------------------------
// RoundPhase
// ---------------------------------------------------------------------------

/// The sub-state of the current round.
///
/// Transitions are strictly ordered and never skip a state:
///
/// ```text
/// Storytelling → Submitting → Voting → Scoring → Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Storytelling,
    Submitting,
    Voting,
    Scoring,
    Completed,
}

impl RoundPhase {
    /// The phase that follows `self`, or `None` once completed.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Storytelling => Some(Self::Submitting),
            Self::Submitting => Some(Self::Voting),
            Self::Voting => Some(Self::Scoring),
            Self::Scoring => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storytelling => write!(f, "storytelling"),
            Self::Submitting => write!(f, "submitting"),
            Self::Voting => write!(f, "voting"),
            Self::Scoring => write!(f, "scoring"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bots, chat, auth
// ---------------------------------------------------------------------------

/// How hard a bot tries. Passed through to the bot advisor untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotDifficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// What kind of chat line this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[default]
    Chat,
    Emote,
    System,
}

/// The phase of the room at the moment a chat line was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPhase {
    Lobby,
    Storytelling,
    Submitting,
    Voting,
    Scoring,
    Finished,
}

/// Which part of the chat log a client wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatHistoryFilter {
    Lobby,
    Voting,
    #[default]
    All,
}

impl ChatHistoryFilter {
    /// Returns `true` if a line sent during `phase` belongs to this filter.
    pub fn matches(self, phase: ChatPhase) -> bool {
        match self {
            Self::Lobby => phase == ChatPhase::Lobby,
            Self::Voting => phase == ChatPhase::Voting,
            Self::All => true,
        }
    }
}

/// How a connection proved who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Guest,
    Token,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Somebody reached the winning score.
    ScoreLimit,
    /// Hands could not be refilled from the deck.
    DeckExhausted,
}

impl EndReason {
    /// Human-readable explanation sent in `game_completed`.
    pub fn message(self) -> &'static str {
        match self {
            Self::ScoreLimit => "a player reached the winning score",
            Self::DeckExhausted => "no more cards in deck",
        }
    }
}
