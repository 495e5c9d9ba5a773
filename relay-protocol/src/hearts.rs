//! Hearts engine (C4), grounded on `WinXP/Protocol/Hearts.hpp`'s wire
//! constants and spec §4.3.2's rules (pass phase, hearts-breaking,
//! shoot-the-moon).

use crate::card::{is_heart, rank_of, suit_of, Card, Suit, QUEEN_OF_SPADES, UNSET_CARD};
use rand::Rng;

pub const NUM_PLAYERS: usize = 4;
pub const NUM_CARDS_IN_HAND: usize = 13;
pub const NUM_CARDS_IN_PASS: usize = 3;
pub const NUM_POINTS_IN_HAND: i16 = 26;
pub const NUM_POINTS_IN_GAME: i16 = 100;

/// Pass direction, cycling `None -> Left -> Right -> Across` each hand
/// (`HeartsPassDirections = 4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDirection {
    None,
    Left,
    Right,
    Across,
}

impl PassDirection {
    pub fn for_hand(hand_number: u32) -> PassDirection {
        match hand_number % 4 {
            0 => PassDirection::None,
            1 => PassDirection::Left,
            2 => PassDirection::Right,
            _ => PassDirection::Across,
        }
    }

    /// Which seat receives `seat`'s pass.
    pub fn target_seat(self, seat: usize) -> Option<usize> {
        match self {
            PassDirection::None => None,
            PassDirection::Left => Some((seat + 1) % NUM_PLAYERS),
            PassDirection::Right => Some((seat + NUM_PLAYERS - 1) % NUM_PLAYERS),
            PassDirection::Across => Some((seat + 2) % NUM_PLAYERS),
        }
    }
}

/// A trick in progress. Unlike Spades there is no trump suit; the
/// highest card of the lead suit always wins.
#[derive(Debug, Clone)]
pub struct Trick {
    lead_card: Option<Card>,
    player_cards: [i16; NUM_PLAYERS],
}

impl Default for Trick {
    fn default() -> Self {
        Trick {
            lead_card: None,
            player_cards: [UNSET_CARD as i16; NUM_PLAYERS],
        }
    }
}

impl Trick {
    pub fn is_finished(&self) -> bool {
        self.player_cards.iter().all(|&c| c != UNSET_CARD as i16)
    }

    pub fn lead_suit(&self) -> Option<Suit> {
        self.lead_card.map(suit_of)
    }

    pub fn set(&mut self, seat: usize, card: Card) {
        if self.lead_card.is_none() {
            self.lead_card = Some(card);
        }
        self.player_cards[seat] = card as i16;
    }

    pub fn follows_suit(&self, card: Card, hand: &[Card]) -> bool {
        let lead_suit = match self.lead_suit() {
            None => return true,
            Some(s) => s,
        };
        if suit_of(card) == lead_suit {
            return true;
        }
        !hand.iter().any(|&c| suit_of(c) == lead_suit)
    }

    pub fn winner(&self) -> usize {
        let lead_suit = self.lead_suit().expect("winner() called on an empty trick");
        let mut best_rank: i16 = -1;
        let mut best_player = None;
        for (seat, &c) in self.player_cards.iter().enumerate() {
            if c == UNSET_CARD as i16 {
                continue;
            }
            if suit_of(c as Card) == lead_suit {
                let rank = rank_of(c as Card) as i16;
                if rank >= best_rank {
                    best_rank = rank;
                    best_player = Some(seat);
                }
            }
        }
        best_player.expect("trick with no lead-suit card")
    }

    /// Point value of the trick: 1 per Heart, 13 for the Queen of
    /// Spades.
    pub fn points(&self) -> i16 {
        self.player_cards
            .iter()
            .filter(|&&c| c != UNSET_CARD as i16)
            .map(|&c| {
                let c = c as Card;
                if c == QUEEN_OF_SPADES {
                    13
                } else if is_heart(c) {
                    1
                } else {
                    0
                }
            })
            .sum()
    }
}

/// §4.3.2 "Play phase": a card may lead Hearts only once broken, or if
/// the leader's hand is entirely Hearts. The very first trick forbids
/// the Queen of Spades and Hearts outright.
pub fn can_lead(card: Card, hand: &[Card], hearts_broken: bool, is_first_trick: bool) -> bool {
    if is_first_trick && (card == QUEEN_OF_SPADES || is_heart(card)) {
        return false;
    }
    if is_heart(card) && !hearts_broken {
        return hand.iter().all(|&c| is_heart(c));
    }
    true
}

/// Whether playing `card` into the trick breaks Hearts (a Heart played
/// anywhere, or the Queen of Spades played in a non-leading position).
pub fn breaks_hearts(card: Card, is_leading: bool) -> bool {
    is_heart(card) || (card == QUEEN_OF_SPADES && !is_leading)
}

/// Per-seat score delta for a finished hand: normally each seat's raw
/// point total; if one seat took all 26 points ("shot the moon") that
/// seat scores 0 and every other seat scores 26 (spec §8 "Shoot the
/// moon").
pub fn score_hand(points_taken: [i16; NUM_PLAYERS]) -> [i16; NUM_PLAYERS] {
    if let Some(shooter) = points_taken.iter().position(|&p| p == NUM_POINTS_IN_HAND) {
        let mut deltas = [NUM_POINTS_IN_HAND; NUM_PLAYERS];
        deltas[shooter] = 0;
        deltas
    } else {
        points_taken
    }
}

/// Spec §8 "Game termination": ends when any seat reaches `>= 100`.
pub fn is_game_over(totals: [i16; NUM_PLAYERS]) -> bool {
    totals.iter().any(|&t| t >= NUM_POINTS_IN_GAME)
}

/// Seat with the lowest total wins (ties broken toward the lowest seat
/// index, matching the deterministic ordering used elsewhere).
pub fn winning_seat(totals: [i16; NUM_PLAYERS]) -> usize {
    totals
        .iter()
        .enumerate()
        .min_by_key(|&(_, &t)| t)
        .map(|(seat, _)| seat)
        .expect("totals is non-empty")
}

pub fn deal_hand<R: Rng>(rng: &mut R) -> [Vec<Card>; NUM_PLAYERS] {
    let deck = crate::card::shuffled_deck(rng);
    let hands = crate::card::deal(&deck, NUM_PLAYERS, NUM_CARDS_IN_HAND, 0);
    let mut out: [Vec<Card>; NUM_PLAYERS] = Default::default();
    for (seat, hand) in hands.into_iter().enumerate() {
        out[seat] = hand;
    }
    out
}

/// Heuristic autoplay: follow suit with the lowest card that still
/// loses the trick when possible (to avoid taking points), otherwise
/// dump the highest off-suit card (preferring point cards to shed
/// them early); when leading, avoid the Queen of Spades and Hearts
/// unless nothing else is playable.
pub fn auto_card(hand: &[Card], trick: &Trick, hearts_broken: bool, is_first_trick: bool) -> Card {
    assert!(!trick.is_finished());

    if let Some(lead_suit) = trick.lead_suit() {
        let of_suit: Vec<Card> = hand.iter().copied().filter(|&c| suit_of(c) == lead_suit).collect();
        if !of_suit.is_empty() {
            let highest_played = trick_highest_rank_of(trick, lead_suit);
            let safe = of_suit.iter().copied().filter(|&c| rank_of(c) < highest_played).max_by_key(|&c| rank_of(c));
            return safe.unwrap_or_else(|| *of_suit.iter().min_by_key(|&&c| rank_of(c)).unwrap());
        }

        // Void in the lead suit: dump the worst liability, preferring
        // the Queen of Spades, then Hearts, then the highest card.
        if let Some(q) = hand.iter().copied().find(|&c| c == QUEEN_OF_SPADES) {
            return q;
        }
        if let Some(h) = hand.iter().copied().filter(|&c| is_heart(c)).max_by_key(|&c| rank_of(c)) {
            return h;
        }
        return *hand.iter().max_by_key(|&&c| rank_of(c)).unwrap();
    }

    // Leading: play the lowest card that's legal to lead.
    let mut candidates: Vec<Card> = hand.iter().copied().filter(|&c| can_lead(c, hand, hearts_broken, is_first_trick)).collect();
    if candidates.is_empty() {
        candidates = hand.to_vec();
    }
    *candidates.iter().min_by_key(|&&c| rank_of(c)).unwrap()
}

fn trick_highest_rank_of(trick: &Trick, suit: Suit) -> u8 {
    trick
        .player_cards
        .iter()
        .filter(|&&c| c != UNSET_CARD as i16 && suit_of(c as Card) == suit)
        .map(|&c| rank_of(c as Card))
        .max()
        .unwrap_or(0)
}

/// Modern `GameMessage` sub-protocol for Hearts (`gameID = 4`, spec C2).
/// Mirrors `spades::wire`'s message-type block convention.
pub mod wire {
    use crate::error::{Error, Result};
    use byteorder::{LittleEndian, WriteBytesExt};

    pub mod message_type {
        pub const DEAL_HAND: i16 = 256;
        pub const PASS_CARDS: i16 = 257;
        pub const CARDS_RECEIVED: i16 = 258;
        pub const PLAY_REQUEST: i16 = 259;
        pub const PLAY: i16 = 260;
        pub const TRICK_COMPLETE: i16 = 261;
        pub const HAND_COMPLETE: i16 = 262;
        pub const GAME_OVER: i16 = 263;
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DealHand {
        pub pass_direction: i16,
        pub cards: Vec<u8>,
    }

    impl DealHand {
        pub fn to_bytes(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(2 + self.cards.len());
            buf.write_i16::<LittleEndian>(self.pass_direction).unwrap();
            buf.extend_from_slice(&self.cards);
            buf
        }
    }

    /// A seat's three passed cards (spec §4.3.2 "Pass phase").
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PassCards {
        pub seat: i16,
        pub cards: [u8; super::NUM_CARDS_IN_PASS],
    }

    impl PassCards {
        pub fn from_bytes(buf: &[u8]) -> Result<PassCards> {
            if buf.len() < 2 + super::NUM_CARDS_IN_PASS {
                return Err(Error::Protocol("PassCards too short"));
            }
            let seat = i16::from_le_bytes([buf[0], buf[1]]);
            let mut cards = [0u8; super::NUM_CARDS_IN_PASS];
            cards.copy_from_slice(&buf[2..2 + super::NUM_CARDS_IN_PASS]);
            Ok(PassCards { seat, cards })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Play {
        pub seat: i16,
        pub card: u8,
    }

    impl Play {
        pub fn to_bytes(self) -> Vec<u8> {
            vec![(self.seat & 0xFF) as u8, (self.seat >> 8) as u8, self.card]
        }

        pub fn from_bytes(buf: &[u8]) -> Result<Play> {
            if buf.len() < 3 {
                return Err(Error::Protocol("Play too short"));
            }
            let seat = i16::from_le_bytes([buf[0], buf[1]]);
            Ok(Play { seat, card: buf[2] })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(suit: Suit, rank: u8) -> Card {
        suit as u8 * 13 + rank
    }

    #[test]
    fn wire_play_round_trips() {
        let play = wire::Play { seat: 1, card: 17 };
        assert_eq!(wire::Play::from_bytes(&play.to_bytes()).unwrap(), play);
    }

    #[test]
    fn hearts_cannot_lead_until_broken_unless_hand_is_all_hearts() {
        let hand = vec![card(Suit::Hearts, 3), card(Suit::Clubs, 5)];
        assert!(!can_lead(card(Suit::Hearts, 3), &hand, false, false));
        assert!(can_lead(card(Suit::Hearts, 3), &hand, true, false));

        let all_hearts = vec![card(Suit::Hearts, 3), card(Suit::Hearts, 9)];
        assert!(can_lead(card(Suit::Hearts, 3), &all_hearts, false, false));
    }

    #[test]
    fn first_trick_forbids_queen_of_spades_and_hearts() {
        let hand = vec![QUEEN_OF_SPADES, card(Suit::Clubs, 0)];
        assert!(!can_lead(QUEEN_OF_SPADES, &hand, true, true));
        assert!(can_lead(card(Suit::Clubs, 0), &hand, true, true));
    }

    #[test]
    fn trick_winner_is_highest_of_lead_suit() {
        let mut trick = Trick::default();
        trick.set(0, card(Suit::Clubs, 3));
        trick.set(1, card(Suit::Hearts, 9));
        trick.set(2, card(Suit::Clubs, 11));
        trick.set(3, card(Suit::Diamonds, 12));
        assert_eq!(trick.winner(), 2);
    }

    #[test]
    fn shoot_the_moon_zeroes_the_shooter() {
        let deltas = score_hand([0, 26, 0, 0]);
        assert_eq!(deltas, [26, 0, 26, 26]);
    }

    #[test]
    fn normal_hand_keeps_raw_points() {
        let deltas = score_hand([5, 10, 3, 8]);
        assert_eq!(deltas, [5, 10, 3, 8]);
    }

    #[test]
    fn game_termination_at_100() {
        assert!(is_game_over([50, 100, 0, 0]));
        assert!(!is_game_over([50, 99, 0, 0]));
        assert_eq!(winning_seat([50, 99, 10, 0]), 3);
    }

    #[test]
    fn pass_direction_cycles_every_four_hands() {
        assert_eq!(PassDirection::for_hand(0), PassDirection::None);
        assert_eq!(PassDirection::for_hand(1), PassDirection::Left);
        assert_eq!(PassDirection::for_hand(2), PassDirection::Right);
        assert_eq!(PassDirection::for_hand(3), PassDirection::Across);
        assert_eq!(PassDirection::for_hand(4), PassDirection::None);
    }
}
