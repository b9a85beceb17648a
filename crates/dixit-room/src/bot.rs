//! Bot decisions.
//!
//! The engine decides WHEN a bot acts (see the autoplay tasks in
//! `room.rs`); a [`BotAdvisor`] decides WHAT it plays. Advisors are
//! stateless and synchronous, so the room can call them between taking a
//! read snapshot and submitting the action.

use dixit_protocol::{BotDifficulty, CardId};
use rand::Rng;
use rand::seq::IndexedRandom;

/// Names handed to bots added from the lobby.
pub const BOT_NAMES: &[&str] = &[
    "Aurora", "Basil", "Cosmo", "Dahlia", "Ember", "Fable", "Juniper", "Marlowe",
    "Nimbus", "Odette",
];

/// Name of the bot that takes over `human_name`'s seat.
pub fn replacement_name(human_name: &str) -> String {
    format!("Bot-{human_name}")
}

/// The action a bot owes in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Clue,
    Submit,
    Vote,
}

/// Chooses cards and clues for bots.
pub trait BotAdvisor: Send + Sync + 'static {
    /// Picks a card to tell about and the clue for it. `None` only for an
    /// empty hand.
    fn choose_storyteller(
        &self,
        hand: &[CardId],
        difficulty: BotDifficulty,
    ) -> Option<(CardId, String)>;

    /// Picks the card from `hand` that best fits `clue`.
    fn choose_card_for_clue(
        &self,
        hand: &[CardId],
        clue: &str,
        difficulty: BotDifficulty,
    ) -> Option<CardId>;

    /// Picks a card from `revealed` that is not one of `own`.
    fn choose_vote(
        &self,
        revealed: &[CardId],
        clue: &str,
        own: &[CardId],
        difficulty: BotDifficulty,
    ) -> Option<CardId>;
}

const CLUE_WORDS: &[&str] = &[
    "ocean", "memory", "silence", "journey", "dream", "shadow", "balance", "escape",
    "home", "curiosity", "time", "secret", "freedom", "wonder", "storm",
];

/// Plays uniformly at random. Difficulty is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomAdvisor;

impl BotAdvisor for RandomAdvisor {
    fn choose_storyteller(
        &self,
        hand: &[CardId],
        _difficulty: BotDifficulty,
    ) -> Option<(CardId, String)> {
        let mut rng = rand::rng();
        let card = *hand.choose(&mut rng)?;
        let word = CLUE_WORDS.choose(&mut rng).copied().unwrap_or("mystery");
        Some((card, word.to_string()))
    }

    fn choose_card_for_clue(
        &self,
        hand: &[CardId],
        _clue: &str,
        _difficulty: BotDifficulty,
    ) -> Option<CardId> {
        hand.choose(&mut rand::rng()).copied()
    }

    fn choose_vote(
        &self,
        revealed: &[CardId],
        _clue: &str,
        own: &[CardId],
        _difficulty: BotDifficulty,
    ) -> Option<CardId> {
        let candidates: Vec<CardId> = revealed
            .iter()
            .copied()
            .filter(|c| !own.contains(c))
            .collect();
        candidates.choose(&mut rand::rng()).copied()
    }
}

/// A uniformly random delay in `[lo, hi]`.
pub(crate) fn think_time<R: Rng + ?Sized>(
    rng: &mut R,
    (lo, hi): (std::time::Duration, std::time::Duration),
) -> std::time::Duration {
    if hi <= lo {
        return lo;
    }
    rng.random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    #[test]
    fn test_random_advisor_never_votes_own_card() {
        let revealed = [CardId(1), CardId(2), CardId(3)];
        for _ in 0..200 {
            let vote = RandomAdvisor
                .choose_vote(&revealed, "clue", &[CardId(2)], BotDifficulty::Medium)
                .unwrap();
            assert_ne!(vote, CardId(2));
        }
    }

    #[test]
    fn test_random_advisor_empty_hand_gives_none() {
        assert!(RandomAdvisor.choose_storyteller(&[], BotDifficulty::Easy).is_none());
        assert!(
            RandomAdvisor
                .choose_card_for_clue(&[], "x", BotDifficulty::Easy)
                .is_none()
        );
    }

    #[test]
    fn test_random_advisor_storyteller_picks_from_hand() {
        let hand = [CardId(4), CardId(9)];
        let (card, clue) = RandomAdvisor
            .choose_storyteller(&hand, BotDifficulty::Hard)
            .unwrap();
        assert!(hand.contains(&card));
        assert!(!clue.is_empty());
    }

    #[test]
    fn test_think_time_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let range = (Duration::from_secs(2), Duration::from_secs(5));
        for _ in 0..100 {
            let d = think_time(&mut rng, range);
            assert!(d >= range.0 && d <= range.1);
        }
    }

    #[test]
    fn test_replacement_name() {
        assert_eq!(replacement_name("Dave"), "Bot-Dave");
    }
}
