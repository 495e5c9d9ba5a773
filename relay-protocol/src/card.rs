//! Shared 52-card deck logic used by the Spades and Hearts engines
//! (spec §4.3.1/§4.3.2). Grounded on `WinCommon/SpadesUtil.hpp`'s
//! `CardSuit` enum and card numbering (`suit = card / 13`, `rank = card
//! % 13`); the Legacy client packs suit/rank differently on the wire but
//! the server only ever needs this one internal representation (the
//! wire encode/decode lives in `protocol`).

use rand::seq::SliceRandom;
use rand::Rng;

pub const NUM_SUITS: u8 = 4;
pub const NUM_RANKS: u8 = 13;
pub const NUM_CARDS: u8 = 52;
pub const UNSET_CARD: i8 = 0x7F;

/// A card is just its position in the 0..52 deck; suit and rank are
/// derived, matching the original's `card / 13`, `card % 13`.
pub type Card = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suit {
    Diamonds = 0,
    Clubs = 1,
    Hearts = 2,
    Spades = 3,
}

impl Suit {
    pub fn from_index(i: u8) -> Suit {
        match i {
            0 => Suit::Diamonds,
            1 => Suit::Clubs,
            2 => Suit::Hearts,
            3 => Suit::Spades,
            _ => panic!("invalid suit index {}", i),
        }
    }
}

pub fn suit_of(card: Card) -> Suit {
    Suit::from_index(card / NUM_RANKS)
}

/// 0 = two, ..., 12 = ace.
pub fn rank_of(card: Card) -> u8 {
    card % NUM_RANKS
}

/// The queen of spades, worth 13 points in Hearts.
pub const QUEEN_OF_SPADES: Card = Suit::Spades as u8 * NUM_RANKS + 10;

pub fn is_heart(card: Card) -> bool {
    suit_of(card) == Suit::Hearts
}

pub fn new_deck() -> Vec<Card> {
    (0..NUM_CARDS).collect()
}

pub fn shuffled_deck<R: Rng>(rng: &mut R) -> Vec<Card> {
    let mut deck = new_deck();
    deck.shuffle(rng);
    deck
}

/// Deals `deck` evenly across `num_seats` hands, `cards_per_hand` each,
/// dealing one card to each seat in turn starting from `first_seat`
/// (mirrors the round-robin deal both `SpadesMatch.cpp` and
/// `HeartsMatch.cpp` perform).
pub fn deal(deck: &[Card], num_seats: usize, cards_per_hand: usize, first_seat: usize) -> Vec<Vec<Card>> {
    let mut hands = vec![Vec::with_capacity(cards_per_hand); num_seats];
    for (i, &card) in deck.iter().take(num_seats * cards_per_hand).enumerate() {
        let seat = (first_seat + i) % num_seats;
        hands[seat].push(card);
    }
    hands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suit_and_rank_roundtrip() {
        assert_eq!(suit_of(0), Suit::Diamonds);
        assert_eq!(rank_of(0), 0);
        assert_eq!(suit_of(12), Suit::Diamonds);
        assert_eq!(rank_of(12), 12);
        assert_eq!(suit_of(13), Suit::Clubs);
        assert_eq!(suit_of(QUEEN_OF_SPADES), Suit::Spades);
        assert_eq!(rank_of(QUEEN_OF_SPADES), 10);
    }

    #[test]
    fn deal_is_exhaustive_and_disjoint() {
        let deck = new_deck();
        let hands = deal(&deck, 4, 13, 0);
        let mut all: Vec<Card> = hands.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, deck);
    }
}
