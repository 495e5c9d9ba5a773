//! Match-level Spades engine (C3 orchestration): turn order, seat
//! ownership validation, and wiring relay-protocol's pure bid/trick/score
//! functions to outgoing wire messages.

use super::{Outgoing, Recipient};
use rand::Rng;
use relay_protocol::card::{suit_of, Card, Suit};
use relay_protocol::error::{Error, Result};
use relay_protocol::spades::wire::{self, message_type};
use relay_protocol::spades::{self, Bid, Trick, DOUBLE_NIL_BID, NUM_PLAYERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bidding,
    Playing,
    GameOver,
}

pub struct SpadesMatch {
    count_nil_overtricks: bool,
    dealer: usize,
    hands: [Vec<Card>; NUM_PLAYERS],
    shown_cards: [bool; NUM_PLAYERS],
    bids: [Bid; NUM_PLAYERS],
    turn: usize,
    phase: Phase,
    trick: Trick,
    spades_broken: bool,
    tricks_taken: [i16; NUM_PLAYERS],
    pub team_scores: [i32; 2],
    team_bags: [i16; 2],
}

impl SpadesMatch {
    pub fn new(count_nil_overtricks: bool) -> SpadesMatch {
        SpadesMatch {
            count_nil_overtricks,
            dealer: NUM_PLAYERS - 1,
            hands: Default::default(),
            shown_cards: [false; NUM_PLAYERS],
            bids: [Bid::HandStart; NUM_PLAYERS],
            turn: 0,
            phase: Phase::Bidding,
            trick: Trick::default(),
            spades_broken: false,
            tricks_taken: [0; NUM_PLAYERS],
            team_scores: [0; 2],
            team_bags: [0; 2],
        }
    }

    pub fn current_turn(&self) -> Option<usize> {
        if self.phase == Phase::GameOver {
            None
        } else {
            Some(self.turn)
        }
    }

    /// Deals a fresh hand and rotates the dealer forward (spec §4.3.1
    /// "Deal"). Called at match start and after every completed hand.
    pub fn start_hand<R: Rng>(&mut self, rng: &mut R) -> Vec<Outgoing> {
        self.dealer = (self.dealer + 1) % NUM_PLAYERS;
        self.hands = spades::deal_hand(rng, self.dealer);
        self.shown_cards = [false; NUM_PLAYERS];
        self.bids = [Bid::HandStart; NUM_PLAYERS];
        self.turn = (self.dealer + 1) % NUM_PLAYERS;
        self.phase = Phase::Bidding;
        self.trick = Trick::default();
        self.spades_broken = false;
        self.tricks_taken = [0; NUM_PLAYERS];

        self.hands
            .iter()
            .enumerate()
            .map(|(seat, hand)| {
                let msg = wire::DealHand {
                    dealer: self.dealer as i16,
                    cards: hand.clone(),
                };
                Outgoing::to(Recipient::Seat(seat), message_type::DEAL_HAND, msg.to_bytes())
            })
            .collect()
    }

    /// A peek is a prerequisite for any non-double-nil bid (spec §4.3.1).
    pub fn handle_show_cards(&mut self, seat: usize) -> Result<Vec<Outgoing>> {
        if self.phase != Phase::Bidding {
            return Err(Error::Protocol("ShowCards outside the bid phase"));
        }
        if !self.bids[seat].is_committed() {
            self.shown_cards[seat] = true;
        }
        Ok(Vec::new())
    }

    pub fn handle_bid(&mut self, seat: usize, value: i8) -> Result<Vec<Outgoing>> {
        if self.phase != Phase::Bidding {
            return Err(Error::Protocol("bid received outside the bid phase"));
        }
        if seat != self.turn {
            return Err(Error::Protocol("bid received out of turn"));
        }

        let bid = if value == DOUBLE_NIL_BID {
            Bid::DoubleNil
        } else if (0..=13).contains(&value) {
            Bid::Value(value as u8)
        } else {
            return Err(Error::Protocol("bid value out of range"));
        };

        if bid != Bid::DoubleNil && !self.shown_cards[seat] {
            return Err(Error::Protocol("non-double-nil bid requires ShowCards first"));
        }

        self.bids[seat] = bid;
        self.turn = (self.turn + 1) % NUM_PLAYERS;

        let mut out = Vec::new();
        if self.bids.iter().all(|b| b.is_committed()) {
            // Dealer's bid was last: reveal every bid simultaneously.
            let mut payload = Vec::with_capacity(NUM_PLAYERS);
            for &b in &self.bids {
                payload.push(bid_wire_value(b));
            }
            out.push(Outgoing::to(Recipient::All, message_type::BID_REVEAL, payload));
            self.phase = Phase::Playing;
            self.turn = (self.dealer + 1) % NUM_PLAYERS;
        }
        Ok(out)
    }

    pub fn handle_play<R: Rng>(&mut self, seat: usize, card: Card, rng: &mut R) -> Result<Vec<Outgoing>> {
        if self.phase != Phase::Playing {
            return Err(Error::Protocol("play received outside the play phase"));
        }
        if seat != self.turn {
            return Err(Error::Protocol("play received out of turn"));
        }
        if !self.hands[seat].contains(&card) {
            return Err(Error::Protocol("seat does not hold that card"));
        }

        let was_leading = self.trick.is_empty();
        if was_leading {
            let hand_has_non_spade = self.hands[seat].iter().any(|&c| suit_of(c) != Suit::Spades);
            if suit_of(card) == Suit::Spades && !self.spades_broken && hand_has_non_spade {
                return Err(Error::Protocol("cannot lead spades before they are broken"));
            }
        } else if !self.trick.follows_suit(card, &self.hands[seat]) {
            return Err(Error::Protocol("must follow the lead suit"));
        }

        self.hands[seat].retain(|&c| c != card);
        self.trick.set(seat, card);
        if suit_of(card) == Suit::Spades && !was_leading {
            self.spades_broken = true;
        }

        let mut out = vec![Outgoing::to(
            Recipient::All,
            message_type::PLAY,
            wire::Play { seat: seat as i16, card }.to_bytes(),
        )];

        if self.trick.is_finished() {
            let winner = self.trick.winner();
            self.tricks_taken[winner] += 1;
            out.push(Outgoing::to(Recipient::All, message_type::TRICK_COMPLETE, vec![winner as u8]));
            self.trick = Trick::default();
            self.turn = winner;

            if self.hands.iter().all(|h| h.is_empty()) {
                out.extend(self.finish_hand(rng));
            }
        } else {
            self.turn = (self.turn + 1) % NUM_PLAYERS;
        }

        Ok(out)
    }

    /// Scores the completed hand and, unless the game just ended, deals
    /// the next one (`original_source/.../SpadesMatch.cpp` loops hands
    /// until a team reaches the winning/losing score, spec §4.3.1 "Deal").
    fn finish_hand<R: Rng>(&mut self, rng: &mut R) -> Vec<Outgoing> {
        let mut player_bids = [0i8; NUM_PLAYERS];
        for (seat, &b) in self.bids.iter().enumerate() {
            player_bids[seat] = match b {
                Bid::DoubleNil => DOUBLE_NIL_BID,
                Bid::Value(v) => v as i8,
                _ => 0,
            };
        }

        let scores = spades::calculate_trick_score(player_bids, self.tricks_taken, self.team_bags, self.count_nil_overtricks);
        for team in 0..2 {
            self.team_scores[team] += scores[team].points as i32;
            self.team_bags[team] = scores[team].bags;
        }

        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(self.team_scores[0] as i32).to_le_bytes());
        payload.extend_from_slice(&(self.team_scores[1] as i32).to_le_bytes());
        let mut out = vec![Outgoing::to(Recipient::All, message_type::HAND_COMPLETE, payload)];

        if spades::is_game_over(self.team_scores) {
            self.phase = Phase::GameOver;
            let winner = spades::winning_team(self.team_scores);
            out.push(Outgoing::to(Recipient::All, message_type::GAME_OVER, vec![winner as u8]));
        } else {
            out.extend(self.start_hand(rng));
        }
        out
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    /// Computer-player substitution hook (spec §4.3 "DisconnectedPlayer").
    /// Drives whichever action (`ShowCards`+bid, or play) is legal for
    /// `seat` if it is currently that seat's turn.
    pub fn auto_play<R: Rng>(&mut self, seat: usize, rng: &mut R) -> Result<Vec<Outgoing>> {
        if self.current_turn() != Some(seat) {
            return Ok(Vec::new());
        }
        match self.phase {
            Phase::Bidding => {
                let bid = spades::auto_bid(&self.hands[seat]);
                self.handle_show_cards(seat)?;
                self.handle_bid(seat, bid as i8)
            }
            Phase::Playing => {
                let card = spades::auto_card(&self.hands[seat], &self.trick, effective_bid(self.bids[seat]), self.spades_broken);
                self.handle_play(seat, card, rng)
            }
            Phase::GameOver => Ok(Vec::new()),
        }
    }
}

fn effective_bid(bid: Bid) -> u8 {
    bid.effective_value().unwrap_or(0)
}

fn bid_wire_value(bid: Bid) -> i8 {
    match bid {
        Bid::DoubleNil => DOUBLE_NIL_BID,
        Bid::Value(v) => v as i8,
        Bid::HandStart | Bid::ShownCards => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn bid_phase_rejects_out_of_turn_bid() {
        let mut m = SpadesMatch::new(false);
        let mut rng = Pcg32::seed_from_u64(1);
        m.start_hand(&mut rng);
        let dealer = m.dealer;
        let first_bidder = (dealer + 1) % NUM_PLAYERS;
        let wrong = (first_bidder + 1) % NUM_PLAYERS;
        assert!(m.handle_bid(wrong, 3).is_err());
    }

    #[test]
    fn non_double_nil_bid_requires_show_cards() {
        let mut m = SpadesMatch::new(false);
        let mut rng = Pcg32::seed_from_u64(1);
        m.start_hand(&mut rng);
        let first_bidder = (m.dealer + 1) % NUM_PLAYERS;
        assert!(m.handle_bid(first_bidder, 3).is_err());
        m.handle_show_cards(first_bidder).unwrap();
        assert!(m.handle_bid(first_bidder, 3).is_ok());
    }

    #[test]
    fn double_nil_bid_skips_show_cards_requirement() {
        let mut m = SpadesMatch::new(false);
        let mut rng = Pcg32::seed_from_u64(1);
        m.start_hand(&mut rng);
        let first_bidder = (m.dealer + 1) % NUM_PLAYERS;
        assert!(m.handle_bid(first_bidder, DOUBLE_NIL_BID).is_ok());
    }

    #[test]
    fn bids_reveal_only_after_dealer_commits() {
        let mut m = SpadesMatch::new(false);
        let mut rng = Pcg32::seed_from_u64(42);
        m.start_hand(&mut rng);
        let dealer = m.dealer;
        let mut seat = (dealer + 1) % NUM_PLAYERS;
        for _ in 0..3 {
            m.handle_show_cards(seat).unwrap();
            let out = m.handle_bid(seat, 2).unwrap();
            assert!(out.is_empty(), "bid should not reveal before dealer commits");
            seat = (seat + 1) % NUM_PLAYERS;
        }
        assert_eq!(seat, dealer);
        m.handle_show_cards(dealer).unwrap();
        let out = m.handle_bid(dealer, 2).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].msg_type, message_type::BID_REVEAL);
    }
}
