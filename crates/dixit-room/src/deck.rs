//! The draw pile.

use std::collections::VecDeque;

use dixit_protocol::CardId;
use rand::Rng;
use rand::seq::SliceRandom;

/// An ordered pile of card ids. Cards are drawn from the front.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deck {
    cards: VecDeque<CardId>,
}

impl Deck {
    /// Every card `1..=catalog_size`, Fisher-Yates shuffled with `rng`.
    pub fn shuffled<R: Rng + ?Sized>(catalog_size: u32, rng: &mut R) -> Self {
        let mut cards: Vec<CardId> = (1..=catalog_size).map(CardId).collect();
        cards.shuffle(rng);
        Self {
            cards: cards.into(),
        }
    }

    /// A deck in exactly the given order.
    pub fn from_cards(cards: impl IntoIterator<Item = CardId>) -> Self {
        Self {
            cards: cards.into_iter().collect(),
        }
    }

    /// Removes and returns the first `min(k, len)` cards.
    pub fn draw(&mut self, k: usize) -> Vec<CardId> {
        let k = k.min(self.cards.len());
        self.cards.drain(..k).collect()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CardId> + '_ {
        self.cards.iter().copied()
    }
}
