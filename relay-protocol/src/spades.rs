//! Spades engine (C3), grounded on `WinCommon/SpadesUtil.hpp` (trick
//! logic, `GetAutoBid`, `GetAutoCard`) and the scoring contract and
//! worked example in spec §4.3.1/§8 scenario 3.

use crate::card::{rank_of, suit_of, Card, Suit, UNSET_CARD};
use rand::Rng;
use std::cmp::Ordering;

pub const NUM_PLAYERS: usize = 4;
pub const NUM_CARDS_IN_HAND: usize = 13;

/// `MsgBid::BID_DOUBLE_NIL`.
pub const DOUBLE_NIL_BID: i8 = -128;

pub const GAME_OVER_WIN_SCORE: i32 = 500;
pub const GAME_OVER_LOSS_SCORE: i32 = -200;

/// A seat's bid state before and after the simultaneous reveal (spec
/// §4.3.1 "Bid phase").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bid {
    HandStart,
    ShownCards,
    DoubleNil,
    Value(u8),
}

impl Bid {
    pub fn is_committed(self) -> bool {
        !matches!(self, Bid::HandStart | Bid::ShownCards)
    }

    /// The effective numeric bid used for scoring/autoplay (double nil
    /// counts as zero tricks, per `GetAutoCard`'s `if (bid == DoubleNilBid) bid = 0;`).
    pub fn effective_value(self) -> Option<u8> {
        match self {
            Bid::Value(v) => Some(v),
            Bid::DoubleNil => Some(0),
            Bid::HandStart | Bid::ShownCards => None,
        }
    }

    pub fn is_nil(self) -> bool {
        matches!(self.effective_value(), Some(0))
    }
}

/// A card trick in progress, mirroring `CardTrick<C, P, UnsetVal>`.
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
    pub fn is_empty(&self) -> bool {
        self.lead_card.is_none()
    }

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

    pub fn card_of(&self, seat: usize) -> Option<Card> {
        let v = self.player_cards[seat];
        if v == UNSET_CARD as i16 {
            None
        } else {
            Some(v as Card)
        }
    }

    /// A card follows suit if the trick has no lead yet, the card matches
    /// the lead suit, or the playing hand holds no card of the lead suit.
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

    /// Highest Spade played wins; otherwise the highest card of the lead
    /// suit wins.
    pub fn winner(&self) -> usize {
        let has_spades = self.player_cards.iter().any(|&c| c != UNSET_CARD as i16 && suit_of(c as Card) == Suit::Spades);
        let target_suit = if has_spades {
            Suit::Spades
        } else {
            self.lead_suit().expect("winner() called on an empty trick")
        };

        let mut best_rank: i16 = -1;
        let mut best_player = None;
        for (seat, &c) in self.player_cards.iter().enumerate() {
            if c == UNSET_CARD as i16 {
                continue;
            }
            if suit_of(c as Card) == target_suit {
                let rank = rank_of(c as Card) as i16;
                if rank >= best_rank {
                    best_rank = rank;
                    best_player = Some(seat);
                }
            }
        }
        best_player.expect("trick with no card of the target suit")
    }

    /// Highest rank already played of `suit`, if any.
    fn highest_played_rank(&self, suit: Suit) -> Option<u8> {
        self.player_cards
            .iter()
            .filter(|&&c| c != UNSET_CARD as i16 && suit_of(c as Card) == suit)
            .map(|&c| rank_of(c as Card))
            .max()
    }
}

fn highest_of_suit(cards: &[Card], suit: Suit, rank_under: u8) -> Option<Card> {
    cards
        .iter()
        .copied()
        .filter(|&c| suit_of(c) == suit && rank_of(c) < rank_under)
        .max_by_key(|&c| rank_of(c))
}

fn lowest_of_suit(cards: &[Card], suit: Suit) -> Option<Card> {
    cards.iter().copied().filter(|&c| suit_of(c) == suit).min_by_key(|&c| rank_of(c))
}

fn highest_not_of_suit(cards: &[Card], suit: Suit) -> Option<Card> {
    cards.iter().copied().filter(|&c| suit_of(c) != suit).max_by_key(|&c| rank_of(c))
}

fn lowest_not_of_suit(cards: &[Card], suit: Suit) -> Option<Card> {
    cards.iter().copied().filter(|&c| suit_of(c) != suit).min_by_key(|&c| rank_of(c))
}

/// `GetAutoBid`: counts aces, protected kings/queens, void/singleton
/// bonuses, spade length, and a safety penalty. Preserved bit-for-bit
/// per the algorithm in `SpadesUtil.hpp`.
pub fn auto_bid(hand: &[Card]) -> u8 {
    assert_eq!(hand.len(), NUM_CARDS_IN_HAND);

    let mut bid: f32 = 0.0;
    let mut by_suit: [Vec<Card>; 4] = Default::default();
    for &c in hand {
        by_suit[suit_of(c) as usize].push(c);
    }

    let mut has_ace_or_high_spade = false;

    for suit_index in 0..4u8 {
        let suit = Suit::from_index(suit_index);
        let suit_cards = &by_suit[suit_index as usize];
        let is_spade = suit == Suit::Spades;

        if !is_spade {
            if suit_cards.is_empty() {
                bid += 1.0;
                continue;
            }
            if suit_cards.len() == 1 {
                bid += 0.5;
            }
        }

        for &c in suit_cards {
            let rank = rank_of(c);

            if rank == 12 {
                bid += 1.0;
                if is_spade {
                    has_ace_or_high_spade = true;
                }
                continue;
            }

            if is_spade {
                if rank == 11 || (rank == 10 && suit_cards.len() >= 3) {
                    bid += 1.0;
                    has_ace_or_high_spade = true;
                }
            } else if (rank == 11 && suit_cards.len() >= 2) || (rank == 10 && suit_cards.len() >= 3) {
                bid += 1.0;
            }
        }
    }

    let spade_count = by_suit[Suit::Spades as usize].len();
    if spade_count > 3 {
        bid += (spade_count - 3) as f32 * 0.5;
    }

    if !has_ace_or_high_spade {
        bid -= 1.0;
    }

    if bid < 0.0 {
        0
    } else {
        bid.floor() as u8
    }
}

/// `GetAutoCard`: chooses a legal, heuristic card for a computer-player
/// seat. `bid` is the seat's *effective* bid (double-nil already folded
/// to zero by the caller, matching `Bid::effective_value`).
pub fn auto_card(hand: &[Card], trick: &Trick, bid: u8, spades_broken: bool) -> Card {
    assert!(!trick.is_finished());

    if let Some(lead_suit) = trick.lead_suit() {
        let lead_cards: Vec<Card> = hand.iter().copied().filter(|&c| suit_of(c) == lead_suit).collect();

        if !lead_cards.is_empty() {
            if bid == 0 {
                if trick.highest_played_rank(Suit::Spades).is_some() {
                    return highest_of_suit(hand, lead_suit, u8::MAX).expect("has lead suit");
                }
                let rank_under = trick.highest_played_rank(lead_suit).unwrap_or(u8::MAX);
                return highest_of_suit(hand, lead_suit, rank_under)
                    .or_else(|| highest_of_suit(hand, lead_suit, u8::MAX))
                    .expect("has lead suit");
            } else {
                if trick.highest_played_rank(Suit::Spades).is_some() {
                    return lowest_of_suit(hand, lead_suit).expect("has lead suit");
                }
                let card = highest_of_suit(hand, lead_suit, u8::MAX).expect("has lead suit");
                let highest_played = trick.highest_played_rank(lead_suit).unwrap_or(0);
                return if rank_of(card) < highest_played {
                    lowest_of_suit(hand, lead_suit).expect("has lead suit")
                } else {
                    card
                };
            }
        }

        // No card of lead suit in hand.
        let spade_count = hand.iter().filter(|&&c| suit_of(c) == Suit::Spades).count();

        if bid == 0 {
            if spade_count > 0 {
                if let Some(highest_played_spade) = trick.highest_played_rank(Suit::Spades) {
                    if let Some(card) = highest_of_suit(hand, Suit::Spades, highest_played_spade) {
                        return card;
                    }
                }
            }
            if spade_count == hand.len() {
                return highest_of_suit(hand, Suit::Spades, u8::MAX).expect("hand is all spades");
            }
            return highest_not_of_suit(hand, Suit::Spades).expect("non-spade card must exist");
        }

        if spade_count > 0 {
            let highest_played_spade = trick.highest_played_rank(Suit::Spades);
            let card = highest_of_suit(hand, Suit::Spades, u8::MAX).expect("has a spade");
            if let Some(highest) = highest_played_spade {
                if rank_of(card) < highest {
                    return lowest_not_of_suit(hand, Suit::Spades).unwrap_or_else(|| lowest_of_suit(hand, Suit::Spades).expect("has a spade"));
                }
            }
            return card;
        }

        return hand.iter().copied().min_by_key(|&c| rank_of(c)).expect("hand is non-empty");
    }

    if bid == 0 {
        return lowest_not_of_suit(hand, Suit::Spades).unwrap_or_else(|| lowest_of_suit(hand, Suit::Spades).expect("hand is non-empty"));
    }

    // Leading, non-nil: play the highest card, excluding Spades unless
    // broken or the hand holds only Spades. Preserved exactly per the
    // open question in spec §9 — not "improved" into a safer discard.
    let all_spades = hand.iter().all(|&c| suit_of(c) == Suit::Spades);
    let exclude_spades = !spades_broken && !all_spades;

    hand.iter()
        .copied()
        .filter(|&c| !(exclude_spades && suit_of(c) == Suit::Spades))
        .max_by_key(|&c| rank_of(c))
        .expect("hand is non-empty")
}

/// Per-team hand score (spec §4.3.1 "Scoring").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrickScore {
    pub points: i16,
    pub bags: i16,
    pub points_base: i16,
    pub points_nil: i16,
    pub points_bag_bonus: i16,
    pub points_bag_penalty: i16,
}

/// Team 0 = seats (0, 2); team 1 = seats (1, 3).
pub fn team_of(seat: usize) -> usize {
    seat % 2
}

/// `CalculateTrickScore`. `player_bids` holds each seat's *bid value*
/// (0..=13, or [`DOUBLE_NIL_BID`]); `player_tricks_taken` each seat's
/// trick count for the hand; `team_bags` the incoming bag carry per
/// team; `count_nil_overtricks` is the Legacy variant flag from spec
/// §4.3.1.
///
/// Team bid is the sum of its non-nil bidders' bids (nil/double-nil
/// contribute nothing to the required trick count, scored separately).
/// A made bid scores `bid * 10`; a broken one `-bid * 10`. Overtricks
/// beyond a made bid each add one bag and one bonus point, *unless* a
/// teammate bid nil, in which case they are suppressed entirely unless
/// `count_nil_overtricks` is set (the Legacy variant). Bags carry across
/// hands and trigger a flat `-100` penalty every time the running total
/// reaches 10, wrapping the counter modulo 10.
pub fn calculate_trick_score(
    player_bids: [i8; NUM_PLAYERS],
    player_tricks_taken: [i16; NUM_PLAYERS],
    team_bags: [i16; 2],
    count_nil_overtricks: bool,
) -> [TrickScore; 2] {
    let mut scores = [TrickScore::default(); 2];

    for team in 0..2 {
        let seats = [team, team + 2];

        let mut nil = 0i16;
        let mut team_bid_tricks = 0i16;
        let mut has_nil_teammate = false;

        for &seat in &seats {
            let bid = player_bids[seat];
            let taken = player_tricks_taken[seat];
            let is_double = bid == DOUBLE_NIL_BID;
            let effective = if is_double { 0 } else { bid as i16 };

            if effective == 0 {
                has_nil_teammate = true;
                if taken == 0 {
                    nil += if is_double { 200 } else { 100 };
                } else {
                    nil -= if is_double { 200 } else { 100 };
                }
            } else {
                team_bid_tricks += effective;
            }
        }

        let team_tricks_taken: i16 = seats.iter().map(|&s| player_tricks_taken[s]).sum();

        let mut base = 0i16;
        let mut overtricks = 0i16;
        if team_bid_tricks > 0 {
            let made = team_tricks_taken >= team_bid_tricks;
            base = if made { team_bid_tricks * 10 } else { -team_bid_tricks * 10 };
            if made {
                overtricks = team_tricks_taken - team_bid_tricks;
            }
        }

        if has_nil_teammate && !count_nil_overtricks {
            overtricks = 0;
        }

        let mut bags = team_bags[team] + overtricks;
        let mut bag_penalty = 0i16;
        if bags >= 10 {
            bag_penalty = -100;
            bags %= 10;
        }
        let bag_bonus = overtricks;

        scores[team] = TrickScore {
            points: base + nil + bag_bonus + bag_penalty,
            bags,
            points_base: base,
            points_nil: nil,
            points_bag_bonus: bag_bonus,
            points_bag_penalty: bag_penalty,
        };
    }

    scores
}

/// Spec §8 "Game termination": ends exactly when some team reaches
/// `>= +500` or `<= -200`.
pub fn is_game_over(team_scores: [i32; 2]) -> bool {
    team_scores.iter().any(|&s| s >= GAME_OVER_WIN_SCORE || s <= GAME_OVER_LOSS_SCORE)
}

/// Winning team, with ties broken on the higher score.
pub fn winning_team(team_scores: [i32; 2]) -> usize {
    match team_scores[0].cmp(&team_scores[1]) {
        Ordering::Greater | Ordering::Equal => 0,
        Ordering::Less => 1,
    }
}

/// Deals a fresh hand: 13 cards each to 4 seats, dealing starting with
/// the seat left of the dealer (matches `SpadesMatch.cpp`'s rotation).
pub fn deal_hand<R: Rng>(rng: &mut R, dealer: usize) -> [Vec<Card>; NUM_PLAYERS] {
    let deck = crate::card::shuffled_deck(rng);
    let first_seat = (dealer + 1) % NUM_PLAYERS;
    let hands = crate::card::deal(&deck, NUM_PLAYERS, NUM_CARDS_IN_HAND, first_seat);
    let mut out: [Vec<Card>; NUM_PLAYERS] = Default::default();
    for (seat, hand) in hands.into_iter().enumerate() {
        out[seat] = hand;
    }
    out
}

/// Modern `GameMessage` sub-protocol for Spades (`gameID = 3`, spec C2),
/// message type ids and fixed record layouts. Not present in the
/// retrieved `original_source`; assigned a concrete, internally
/// consistent block starting at 256 per `DESIGN.md`, mirroring Hearts'
/// own block in `hearts::wire`.
pub mod wire {
    use crate::error::{Error, Result};
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::io::Cursor;

    pub mod message_type {
        pub const DEAL_HAND: i16 = 256;
        pub const SHOW_CARDS: i16 = 257;
        pub const BID: i16 = 258;
        pub const BID_REVEAL: i16 = 259;
        pub const PLAY_REQUEST: i16 = 260;
        pub const PLAY: i16 = 261;
        pub const TRICK_COMPLETE: i16 = 262;
        pub const HAND_COMPLETE: i16 = 263;
        pub const GAME_OVER: i16 = 264;
    }

    /// Personalized per-seat deal: only the recipient's own 13 cards.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DealHand {
        pub dealer: i16,
        pub cards: Vec<u8>,
    }

    impl DealHand {
        pub fn to_bytes(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(2 + self.cards.len());
            buf.write_i16::<LittleEndian>(self.dealer).unwrap();
            buf.extend_from_slice(&self.cards);
            buf
        }
    }

    /// A seat's committed bid (spec §4.3.1 "Bid phase"). Value is the raw
    /// `i8` contract: `0..=13` or [`super::DOUBLE_NIL_BID`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Bid {
        pub seat: i16,
        pub value: i8,
    }

    impl Bid {
        pub fn to_bytes(self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(3);
            buf.write_i16::<LittleEndian>(self.seat).unwrap();
            buf.write_i8(self.value).unwrap();
            buf
        }

        pub fn from_bytes(buf: &[u8]) -> Result<Bid> {
            let mut cur = Cursor::new(buf);
            let seat = cur.read_i16::<LittleEndian>().map_err(|_| Error::Protocol("Bid too short"))?;
            let value = cur.read_i8().map_err(|_| Error::Protocol("Bid too short"))?;
            Ok(Bid { seat, value })
        }
    }

    /// A seat's played card (spec §4.3.1 "Play phase").
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
    fn wire_bid_round_trips() {
        let bid = wire::Bid { seat: 2, value: -128 };
        let bytes = bid.to_bytes();
        assert_eq!(wire::Bid::from_bytes(&bytes).unwrap(), bid);
    }

    #[test]
    fn wire_play_round_trips() {
        let play = wire::Play { seat: 3, card: 42 };
        let bytes = play.to_bytes();
        assert_eq!(wire::Play::from_bytes(&bytes).unwrap(), play);
    }

    #[test]
    fn suit_following_trick_winner_highest_spade() {
        let mut trick = Trick::default();
        trick.set(0, card(Suit::Hearts, 5));
        trick.set(1, card(Suit::Spades, 2));
        trick.set(2, card(Suit::Hearts, 9));
        trick.set(3, card(Suit::Spades, 0));
        assert_eq!(trick.winner(), 1);
    }

    #[test]
    fn trick_winner_no_spades_is_highest_lead_suit() {
        let mut trick = Trick::default();
        trick.set(0, card(Suit::Clubs, 3));
        trick.set(1, card(Suit::Hearts, 9));
        trick.set(2, card(Suit::Clubs, 11));
        trick.set(3, card(Suit::Diamonds, 12));
        assert_eq!(trick.winner(), 2);
    }

    #[test]
    fn follows_suit_requires_lead_suit_when_held() {
        let mut trick = Trick::default();
        trick.set(0, card(Suit::Clubs, 3));
        let hand = vec![card(Suit::Clubs, 5), card(Suit::Hearts, 2)];
        assert!(!trick.follows_suit(card(Suit::Hearts, 2), &hand));
        assert!(trick.follows_suit(card(Suit::Clubs, 5), &hand));
    }

    #[test]
    fn follows_suit_allows_anything_when_void() {
        let mut trick = Trick::default();
        trick.set(0, card(Suit::Clubs, 3));
        let hand = vec![card(Suit::Hearts, 2), card(Suit::Spades, 4)];
        assert!(trick.follows_suit(card(Suit::Hearts, 2), &hand));
    }

    #[test]
    fn nil_success_and_partner_made_bid() {
        // Seat 0 bids nil and takes none; seat 2 bids 3 and takes 4
        // (team 0). Seat 1 bids 4 and takes 4; seat 3 bids 2 and takes 2
        // (team 1, bid made exactly, no overtrick).
        let bids = [0, 4, 3, 2];
        let tricks = [0, 4, 4, 2];
        let scores = calculate_trick_score(bids, tricks, [0, 0], false);

        // Team 0: nil succeeds (+100); partner's bid of 3 is made with
        // one overtrick, but overtricks are suppressed because a
        // teammate bid nil and `count_nil_overtricks` is false.
        assert_eq!(scores[0].points_nil, 100);
        assert_eq!(scores[0].points_base, 30);
        assert_eq!(scores[0].points_bag_bonus, 0);
        assert_eq!(scores[0].points, 130);
        assert_eq!(scores[0].bags, 0);

        // Team 1: combined bid 6, made exactly, no overtrick.
        assert_eq!(scores[1].points_base, 60);
        assert_eq!(scores[1].points, 60);
        assert_eq!(scores[1].bags, 0);
    }

    #[test]
    fn failed_nil_is_penalized() {
        let bids = [0, 0, 0, 0];
        let tricks = [2, 11, 0, 0];
        let scores = calculate_trick_score(bids, tricks, [0, 0], false);
        assert_eq!(scores[0].points_nil, -100);
    }

    #[test]
    fn double_nil_doubles_the_swing() {
        let bids = [DOUBLE_NIL_BID, 0, 0, 0];
        let tricks = [0, 0, 0, 0];
        let scores = calculate_trick_score(bids, tricks, [0, 0], false);
        assert_eq!(scores[0].points_nil, 200);
    }

    #[test]
    fn bag_carry_wraps_at_ten_with_penalty() {
        let bids = [3, 0, 0, 0];
        let tricks = [9, 0, 0, 0];
        // Team 0 bid 3, took 9 (overtricks 6), plus incoming bags 4 -> 10 -> penalty, 10 % 10 = 0.
        let scores = calculate_trick_score(bids, tricks, [4, 0], false);
        assert_eq!(scores[0].points_bag_penalty, -100);
        assert_eq!(scores[0].bags, 0);
    }

    #[test]
    fn count_nil_overtricks_variant_restores_bags() {
        let bids = [0, 4, 3, 2];
        let tricks = [0, 4, 4, 2];
        let scores = calculate_trick_score(bids, tricks, [0, 0], true);
        assert_eq!(scores[0].points_bag_bonus, 1);
        assert_eq!(scores[0].bags, 1);
    }

    #[test]
    fn game_termination_thresholds() {
        assert!(is_game_over([500, 0]));
        assert!(is_game_over([0, -200]));
        assert!(!is_game_over([499, -199]));
        assert_eq!(winning_team([500, 100]), 0);
        assert_eq!(winning_team([100, 500]), 1);
        assert_eq!(winning_team([500, 500]), 0);
    }
}
