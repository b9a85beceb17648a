//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Every tunable of the room engine.
///
/// Durations are plain [`Duration`]s so tests can shrink them freely; the
/// server binary overrides a handful from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cards in the catalog, numbered `1..=catalog_size`.
    pub catalog_size: u32,

    /// Cards each seat holds after a deal or refill.
    pub hand_size: usize,

    /// Minimum seats needed to start.
    pub min_players: usize,

    /// Maximum seats in a room.
    pub max_players: usize,

    /// First score to reach this ends the game.
    pub winning_score: u32,

    /// Pause between a completed round and the next storytelling phase.
    pub next_round_delay: Duration,

    /// Bot think time while storytelling, as an inclusive range.
    pub bot_clue_delay: (Duration, Duration),

    /// Bot think time while submitting.
    pub bot_submit_delay: (Duration, Duration),

    /// Bot think time while voting.
    pub bot_vote_delay: (Duration, Duration),

    /// How often the janitor sweeps the registry.
    pub janitor_period: Duration,

    /// A room with no connected human is closed after this much idleness.
    pub empty_room_timeout: Duration,

    /// Any room is closed after this much idleness.
    pub occupied_room_timeout: Duration,

    /// A disconnected human is replaced by a bot after this long.
    pub afk_threshold: Duration,

    /// A sink that cannot accept a frame within this window is dropped.
    pub sink_write_deadline: Duration,

    /// Deadline applied to every store call.
    pub store_deadline: Duration,

    /// Frames buffered per connection before writes start to wait.
    pub sink_buffer: usize,

    /// Longest chat line, in bytes.
    pub chat_max_bytes: usize,

    /// Longest clue, in bytes.
    pub clue_max_bytes: usize,

    /// Chat history page size when the client gives none.
    pub chat_history_default: u32,

    /// Largest chat history page a client may ask for.
    pub chat_history_max: u32,

    /// Lifetime of mirrored snapshots in the cache.
    pub cache_ttl: Duration,

    /// Fixed RNG seed for decks, reveal order and bot timing. `None` draws
    /// from the operating system.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_size: 84,
            hand_size: 6,
            min_players: 3,
            max_players: 6,
            winning_score: 30,
            next_round_delay: Duration::from_secs(5),
            bot_clue_delay: (Duration::from_secs(2), Duration::from_secs(5)),
            bot_submit_delay: (Duration::from_secs(3), Duration::from_secs(8)),
            bot_vote_delay: (Duration::from_secs(2), Duration::from_secs(6)),
            janitor_period: Duration::from_secs(120),
            empty_room_timeout: Duration::from_secs(10 * 60),
            occupied_room_timeout: Duration::from_secs(30 * 60),
            afk_threshold: Duration::from_secs(3 * 60),
            sink_write_deadline: Duration::from_secs(5),
            store_deadline: Duration::from_secs(5),
            sink_buffer: 64,
            chat_max_bytes: 500,
            clue_max_bytes: 500,
            chat_history_default: 50,
            chat_history_max: 100,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Clamps a requested chat history size into `1..=chat_history_max`.
    pub fn chat_limit(&self, requested: Option<u32>) -> usize {
        requested
            .unwrap_or(self.chat_history_default)
            .clamp(1, self.chat_history_max) as usize
    }
}
