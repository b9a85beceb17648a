//! Wire protocol for the storyteller card game server.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`ParticipantId`], [`RoomCode`], [`CardId`], [`RoomStatus`],
//!   [`RoundPhase`], ...): identifiers and enums shared by every layer.
//! - **Messages** ([`ClientMessage`], [`ServerEvent`]): the `{type, payload}`
//!   envelopes that travel over the socket.
//! - **Snapshots** ([`GameSnapshot`], [`PlayerView`], [`RoundView`]): the
//!   stable `game_state` contract.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become text.
//!
//! # Architecture
//!
//! ```text
//! Transport (text frames) → Protocol (ClientMessage / ServerEvent) → Room engine
//! ```
//!
//! Nothing here performs I/O or knows about rooms; it only describes shapes.

mod codec;
mod error;
mod messages;
mod snapshot;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    AddBot, CardSubmitted, ChatHistory, ClientMessage, ClueSubmitted,
    ConnectionEstablished, CreateGame, ErrorPayload, FinalScore, GameCompleted,
    GameDeleted, GameStarted, GetChatHistory, JoinGame, PlayerJoined,
    PlayerLeft, PlayerReplaced, RoomRef, RoundCompleted, RoundStarted,
    ScoreChange, SendChat, ServerEvent, SubmitCard, SubmitClue, SubmitVote,
    VoteSubmitted, VoteView, VotingStarted,
};
pub use snapshot::{
    ChatMessageView, GameSnapshot, PlayerView, RevealedCard, RoundView,
};
pub use types::{
    AuthType, BotDifficulty, CardId, ChatHistoryFilter, ChatKind,
    ChatMessageId, ChatPhase, EndReason, ParticipantId, RoomCode, RoomId,
    RoomStatus, RoundId, RoundPhase,
};
