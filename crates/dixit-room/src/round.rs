//! One round of play and its scoring.
//!
//! ```text
//! Storytelling ──clue──→ Submitting ──last card──→ Voting ──last vote──→ Scoring → Completed
//! ```
//!
//! A `Round` is plain data plus rule checks. It never touches participants'
//! hands; the room moves cards and then records them here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dixit_protocol::{CardId, ParticipantId, RevealedCard, RoundId, RoundPhase, RoundView};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::RoomError;
use crate::bot::BotAction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub number: u32,
    pub storyteller_id: ParticipantId,
    pub clue: String,
    pub phase: RoundPhase,
    pub storyteller_card: Option<CardId>,
    /// In submission order.
    pub submissions: Vec<(ParticipantId, CardId)>,
    /// In voting order.
    pub votes: Vec<(ParticipantId, CardId)>,
    /// Storyteller card plus submissions, shuffled. Empty before voting.
    pub reveal: Vec<CardId>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn new(number: u32, storyteller_id: ParticipantId) -> Self {
        Self {
            id: RoundId::random(),
            number,
            storyteller_id,
            clue: String::new(),
            phase: RoundPhase::Storytelling,
            storyteller_card: None,
            submissions: Vec::new(),
            votes: Vec::new(),
            reveal: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn advance(&mut self, target: RoundPhase) -> Result<(), RoomError> {
        if !self.phase.can_transition_to(target) {
            return Err(RoomError::Internal(format!(
                "round {} cannot move from {} to {}",
                self.number, self.phase, target
            )));
        }
        self.phase = target;
        Ok(())
    }

    /// Records the storyteller's clue and card and opens submissions.
    pub fn tell(&mut self, clue: String, card: CardId) -> Result<(), RoomError> {
        self.advance(RoundPhase::Submitting)?;
        self.clue = clue;
        self.storyteller_card = Some(card);
        Ok(())
    }

    pub fn has_submitted(&self, id: ParticipantId) -> bool {
        self.submissions.iter().any(|(p, _)| *p == id)
    }

    pub fn has_voted(&self, id: ParticipantId) -> bool {
        self.votes.iter().any(|(p, _)| *p == id)
    }

    pub fn submission_of(&self, id: ParticipantId) -> Option<CardId> {
        self.submissions
            .iter()
            .find_map(|(p, c)| (*p == id).then_some(*c))
    }

    /// The action this phase still expects from `id`, if any.
    pub fn owed_action(&self, id: ParticipantId) -> Option<BotAction> {
        let storyteller = self.storyteller_id == id;
        match self.phase {
            RoundPhase::Storytelling if storyteller => Some(BotAction::Clue),
            RoundPhase::Submitting if !storyteller && !self.has_submitted(id) => {
                Some(BotAction::Submit)
            }
            RoundPhase::Voting if !storyteller && !self.has_voted(id) => Some(BotAction::Vote),
            _ => None,
        }
    }

    /// Shuffles the storyteller card in with the submissions and opens
    /// voting.
    pub fn begin_voting<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), RoomError> {
        let Some(card) = self.storyteller_card else {
            return Err(RoomError::Internal("voting without a storyteller card".into()));
        };
        self.advance(RoundPhase::Voting)?;
        self.reveal = std::iter::once(card)
            .chain(self.submissions.iter().map(|(_, c)| *c))
            .collect();
        self.reveal.shuffle(rng);
        Ok(())
    }

    /// Moves through scoring to completion and returns each participant's
    /// gain. Every storyteller and voter appears in the result, even with a
    /// gain of zero.
    pub fn conclude(&mut self) -> Result<BTreeMap<ParticipantId, u32>, RoomError> {
        self.advance(RoundPhase::Scoring)?;
        let gains = self.score();
        self.advance(RoundPhase::Completed)?;
        Ok(gains)
    }

    /// Applies the scoring rules to the recorded votes.
    ///
    /// With `V` votes on the storyteller card out of `T`:
    /// - `V == 0` or `V == T`: storyteller +0, every other player +2.
    /// - otherwise: storyteller +3, each correct voter +3.
    /// - always: a submitted card earns its owner +1 per vote from someone
    ///   else.
    pub fn score(&self) -> BTreeMap<ParticipantId, u32> {
        let mut gains: BTreeMap<ParticipantId, u32> = BTreeMap::new();
        gains.insert(self.storyteller_id, 0);
        for (id, _) in self.submissions.iter().chain(self.votes.iter()) {
            gains.entry(*id).or_insert(0);
        }

        let total = self.votes.len();
        let correct = self
            .votes
            .iter()
            .filter(|(_, card)| Some(*card) == self.storyteller_card)
            .count();

        if correct == 0 || correct == total {
            for (id, gain) in gains.iter_mut() {
                if *id != self.storyteller_id {
                    *gain += 2;
                }
            }
        } else {
            *gains.entry(self.storyteller_id).or_insert(0) += 3;
            for (voter, card) in &self.votes {
                if Some(*card) == self.storyteller_card {
                    *gains.entry(*voter).or_insert(0) += 3;
                }
            }
        }

        for (voter, card) in &self.votes {
            if let Some(owner) = self.owner_of(*card) {
                if owner != self.storyteller_id && owner != *voter {
                    *gains.entry(owner).or_insert(0) += 1;
                }
            }
        }
        gains
    }

    /// Who played `card` this round.
    pub fn owner_of(&self, card: CardId) -> Option<ParticipantId> {
        if self.storyteller_card == Some(card) {
            return Some(self.storyteller_id);
        }
        self.submissions
            .iter()
            .find_map(|(p, c)| (*c == card).then_some(*p))
    }

    pub fn votes_for(&self, card: CardId) -> u32 {
        self.votes.iter().filter(|(_, c)| *c == card).count() as u32
    }

    /// Every card currently on the table.
    pub fn cards(&self) -> impl Iterator<Item = CardId> + '_ {
        self.storyteller_card
            .into_iter()
            .chain(self.submissions.iter().map(|(_, c)| *c))
    }

    /// Moves every participant id equal to `from` to `to`. Used when a bot
    /// takes over a seat mid-round.
    pub fn reassign(&mut self, from: ParticipantId, to: ParticipantId) {
        if self.storyteller_id == from {
            self.storyteller_id = to;
        }
        for (id, _) in self.submissions.iter_mut().chain(self.votes.iter_mut()) {
            if *id == from {
                *id = to;
            }
        }
    }

    /// The reveal with owners and tallies exposed only once the round is
    /// over.
    pub fn revealed(&self) -> Vec<RevealedCard> {
        let open = self.phase == RoundPhase::Completed;
        self.reveal
            .iter()
            .map(|card| RevealedCard {
                card_id: *card,
                owner_id: if open { self.owner_of(*card) } else { None },
                vote_count: if open { self.votes_for(*card) } else { 0 },
            })
            .collect()
    }

    /// Renders the round for `viewer`.
    pub fn view(&self, viewer: Option<ParticipantId>) -> RoundView {
        let open = self.phase == RoundPhase::Completed;
        let storyteller_card = if open || viewer == Some(self.storyteller_id) {
            self.storyteller_card
        } else {
            None
        };
        RoundView {
            id: self.id,
            round_number: self.number,
            storyteller_id: self.storyteller_id,
            clue: self.clue.clone(),
            status: self.phase,
            storyteller_card,
            revealed_cards: (!self.reveal.is_empty()).then(|| self.revealed()),
            submitted: self.submissions.iter().map(|(p, _)| *p).collect(),
            voted: self.votes.iter().map(|(p, _)| *p).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Table {
        alice: ParticipantId,
        bob: ParticipantId,
        carol: ParticipantId,
        round: Round,
    }

    /// Alice tells with 7, Bob plays 12, Carol plays 25.
    fn table() -> Table {
        let alice = ParticipantId::random();
        let bob = ParticipantId::random();
        let carol = ParticipantId::random();
        let mut round = Round::new(1, alice);
        round.tell("ocean".into(), CardId(7)).unwrap();
        round.submissions.push((bob, CardId(12)));
        round.submissions.push((carol, CardId(25)));
        round
            .begin_voting(&mut StdRng::seed_from_u64(1))
            .unwrap();
        Table {
            alice,
            bob,
            carol,
            round,
        }
    }

    #[test]
    fn test_score_some_guess_correctly() {
        let mut t = table();
        t.round.votes.push((t.bob, CardId(7)));
        t.round.votes.push((t.carol, CardId(12)));
        let gains = t.round.conclude().unwrap();
        assert_eq!(gains[&t.alice], 3);
        assert_eq!(gains[&t.bob], 4);
        assert_eq!(gains[&t.carol], 0);
    }

    #[test]
    fn test_score_everyone_guesses_correctly() {
        let mut t = table();
        t.round.votes.push((t.bob, CardId(7)));
        t.round.votes.push((t.carol, CardId(7)));
        let gains = t.round.score();
        assert_eq!(gains[&t.alice], 0);
        assert_eq!(gains[&t.bob], 2);
        assert_eq!(gains[&t.carol], 2);
    }

    #[test]
    fn test_score_nobody_guesses_correctly() {
        let mut t = table();
        t.round.votes.push((t.bob, CardId(25)));
        t.round.votes.push((t.carol, CardId(25)));
        let gains = t.round.score();
        assert_eq!(gains[&t.alice], 0);
        assert_eq!(gains[&t.bob], 2);
        assert_eq!(gains[&t.carol], 3);
    }

    #[test]
    fn test_score_vote_on_own_card_earns_no_bonus() {
        let mut t = table();
        t.round.votes.push((t.bob, CardId(12)));
        t.round.votes.push((t.carol, CardId(25)));
        let gains = t.round.score();
        assert_eq!(gains[&t.bob], 2);
        assert_eq!(gains[&t.carol], 2);
    }

    #[test]
    fn test_begin_voting_reveals_every_card() {
        let t = table();
        let mut cards = t.round.reveal.clone();
        cards.sort();
        assert_eq!(cards, vec![CardId(7), CardId(12), CardId(25)]);
        assert_eq!(t.round.phase, RoundPhase::Voting);
    }

    #[test]
    fn test_reveal_order_is_uniform() {
        const ROUNDS: usize = 4000;
        let mut rng = StdRng::seed_from_u64(99);
        // counts[card][slot]
        let mut counts = [[0usize; 4]; 4];
        for _ in 0..ROUNDS {
            let mut round = Round::new(1, ParticipantId::random());
            round.tell("ocean".into(), CardId(0)).unwrap();
            for card in 1..4 {
                round.submissions.push((ParticipantId::random(), CardId(card)));
            }
            round.begin_voting(&mut rng).unwrap();
            for (slot, card) in round.reveal.iter().enumerate() {
                counts[card.0 as usize][slot] += 1;
            }
        }
        // Each cell expects 1000; the standard deviation is about 27.
        for (card, slots) in counts.iter().enumerate() {
            for (slot, &n) in slots.iter().enumerate() {
                assert!(
                    (850..=1150).contains(&n),
                    "card {card} landed in slot {slot} {n} times"
                );
            }
        }
    }

    #[test]
    fn test_tell_twice_is_rejected() {
        let mut round = Round::new(1, ParticipantId::random());
        round.tell("a".into(), CardId(1)).unwrap();
        assert!(matches!(
            round.tell("b".into(), CardId(2)),
            Err(RoomError::Internal(_))
        ));
    }

    #[test]
    fn test_view_hides_secrets_until_completed() {
        let mut t = table();
        let view = t.round.view(Some(t.bob));
        assert_eq!(view.storyteller_card, None);
        assert!(
            view.revealed_cards
                .unwrap()
                .iter()
                .all(|c| c.owner_id.is_none())
        );
        assert_eq!(t.round.view(Some(t.alice)).storyteller_card, Some(CardId(7)));

        t.round.votes.push((t.bob, CardId(7)));
        t.round.votes.push((t.carol, CardId(7)));
        t.round.conclude().unwrap();
        let view = t.round.view(Some(t.bob));
        assert_eq!(view.storyteller_card, Some(CardId(7)));
        let revealed = view.revealed_cards.unwrap();
        let seven = revealed.iter().find(|c| c.card_id == CardId(7)).unwrap();
        assert_eq!(seven.owner_id, Some(t.alice));
        assert_eq!(seven.vote_count, 2);
    }

    #[test]
    fn test_owed_action_follows_phase() {
        let mut round = Round::new(1, ParticipantId::random());
        let storyteller = round.storyteller_id;
        let other = ParticipantId::random();
        assert_eq!(round.owed_action(storyteller), Some(BotAction::Clue));
        assert_eq!(round.owed_action(other), None);

        round.tell("x".into(), CardId(1)).unwrap();
        assert_eq!(round.owed_action(storyteller), None);
        assert_eq!(round.owed_action(other), Some(BotAction::Submit));

        round.submissions.push((other, CardId(2)));
        assert_eq!(round.owed_action(other), None);
        round.begin_voting(&mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(round.owed_action(other), Some(BotAction::Vote));
    }

    #[test]
    fn test_reassign_moves_storyteller_and_submissions() {
        let mut t = table();
        let bot = ParticipantId::random();
        t.round.reassign(t.bob, bot);
        assert_eq!(t.round.submission_of(bot), Some(CardId(12)));
        assert!(!t.round.has_submitted(t.bob));

        t.round.reassign(t.alice, bot);
        assert_eq!(t.round.storyteller_id, bot);
    }
}
