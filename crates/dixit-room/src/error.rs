//! Error types for the room layer.

use dixit_protocol::ServerEvent;

/// Errors a room operation reports to its caller.
///
/// Validation failures go back to the originating connection only, as an
/// `error` event whose `code` is [`RoomError::code`]. They are never
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room code is already taken")]
    RoomCodeTaken,

    #[error("game not found")]
    GameNotFound,

    #[error("game has already started")]
    GameStarted,

    #[error("game has not started")]
    GameNotStarted,

    #[error("room is full")]
    RoomFull,

    #[error("already joined this game")]
    AlreadyJoined,

    #[error("not a participant in this game")]
    NotAParticipant,

    #[error("not enough players to start")]
    NotEnoughPlayers,

    #[error("no active round")]
    NoActiveRound,

    #[error("action not allowed in the current phase")]
    WrongPhase,

    #[error("only the storyteller can do that")]
    NotStoryteller,

    #[error("the storyteller cannot submit a card")]
    StorytellerCannotSubmit,

    #[error("the storyteller cannot vote")]
    StorytellerCannotVote,

    #[error("card is not in your hand")]
    CardNotInHand,

    #[error("card is not on the table")]
    InvalidCard,

    #[error("already submitted a card this round")]
    AlreadySubmitted,

    #[error("already voted this round")]
    AlreadyVoted,

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("participant was already replaced by a bot")]
    AlreadyReplaced,

    #[error("participant is a bot")]
    IsBot,

    #[error("message is too long")]
    MessageTooLong,

    #[error("message is empty")]
    EmptyMessage,

    #[error("chat is not allowed in this phase")]
    ChatNotAllowedInPhase,

    #[error("storage is unavailable")]
    StoreUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Stable wire code for the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomCodeTaken => "room_code_taken",
            Self::GameNotFound => "game_not_found",
            Self::GameStarted => "game_started",
            Self::GameNotStarted => "game_not_started",
            Self::RoomFull => "room_full",
            Self::AlreadyJoined => "already_joined",
            Self::NotAParticipant => "not_a_participant",
            Self::NotEnoughPlayers => "not_enough_players",
            Self::NoActiveRound => "no_active_round",
            Self::WrongPhase => "wrong_phase",
            Self::NotStoryteller => "not_storyteller",
            Self::StorytellerCannotSubmit => "storyteller_cannot_submit",
            Self::StorytellerCannotVote => "storyteller_cannot_vote",
            Self::CardNotInHand => "card_not_in_hand",
            Self::InvalidCard => "invalid_card",
            Self::AlreadySubmitted => "already_submitted",
            Self::AlreadyVoted => "already_voted",
            Self::ParticipantNotFound => "participant_not_found",
            Self::AlreadyReplaced => "already_replaced",
            Self::IsBot => "is_bot",
            Self::MessageTooLong => "message_too_long",
            Self::EmptyMessage => "empty_message",
            Self::ChatNotAllowedInPhase => "chat_not_allowed_in_phase",
            Self::StoreUnavailable => "store_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// The `error` event reporting this failure.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }
}

/// Errors surfaced by a [`Store`](crate::Store) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// The call did not finish within the configured deadline.
    #[error("store call timed out")]
    Timeout,
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::RoomCodeTaken,
            StoreError::Unavailable(_) | StoreError::Timeout => Self::StoreUnavailable,
        }
    }
}
