//! Room engine for the storyteller card game.
//!
//! Each room is shared state behind a Tokio `RwLock`, with an ordered
//! outbox drained by one dispatcher task per room. Rules run synchronously
//! under the lock; socket writes, store writes and the cache mirror happen
//! afterwards, off the lock, in the order the rules produced them.
//!
//! # Key types
//!
//! - [`Registry`]: creates, finds, restores and deletes rooms, and tracks
//!   each participant's current connection sink
//! - [`Room`]: one game's async API (join, start, clue, card, vote, chat)
//! - [`Janitor`]: closes idle rooms and hands absent players to bots
//! - [`Store`] and [`Cache`]: the durable record and the snapshot mirror
//! - [`BotAdvisor`]: what a bot plays; the engine decides when
//! - [`EngineContext`]: config, seams and background task tracking

mod bot;
mod cache;
mod config;
mod context;
mod deck;
mod error;
mod janitor;
mod outbox;
mod participant;
mod registry;
mod room;
mod round;
mod state;
mod store;

pub use bot::{BOT_NAMES, BotAction, BotAdvisor, RandomAdvisor, replacement_name};
pub use cache::{Cache, MemoryCache, NoopCache};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use deck::Deck;
pub use error::{RoomError, StoreError};
pub use janitor::{Janitor, SweepReport};
pub use participant::{Frame, Participant, ParticipantSink, SinkError};
pub use registry::Registry;
pub use room::Room;
pub use round::Round;
pub use state::JoinOutcome;
pub use store::{
    MemoryStore, ParticipantRecord, RoomRecord, RoundRecord, Store, StoreResult, StoreWrite,
    StoredParticipant, StoredRoom,
};
