//! Match-level Hearts engine (C4 orchestration): pass phase, turn order,
//! and wiring relay-protocol's pure trick/score functions to outgoing
//! wire messages.

use super::{Outgoing, Recipient};
use rand::Rng;
use relay_protocol::card::Card;
use relay_protocol::error::{Error, Result};
use relay_protocol::hearts::wire::{self, message_type};
use relay_protocol::hearts::{self, PassDirection, Trick, NUM_CARDS_IN_PASS, NUM_PLAYERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Passing,
    Playing,
    GameOver,
}

pub struct HeartsMatch {
    hand_number: u32,
    pass_direction: PassDirection,
    hands: [Vec<Card>; NUM_PLAYERS],
    passes_submitted: [Option<[Card; NUM_CARDS_IN_PASS]>; NUM_PLAYERS],
    hearts_broken: bool,
    is_first_trick: bool,
    trick: Trick,
    turn: usize,
    phase: Phase,
    points_taken: [i16; NUM_PLAYERS],
    pub totals: [i16; NUM_PLAYERS],
}

impl HeartsMatch {
    pub fn new() -> HeartsMatch {
        HeartsMatch {
            hand_number: 0,
            pass_direction: PassDirection::None,
            hands: Default::default(),
            passes_submitted: [None; NUM_PLAYERS],
            hearts_broken: false,
            is_first_trick: true,
            trick: Trick::default(),
            turn: 0,
            phase: Phase::Passing,
            points_taken: [0; NUM_PLAYERS],
            totals: [0; NUM_PLAYERS],
        }
    }

    pub fn current_turn(&self) -> Option<usize> {
        if self.phase == Phase::GameOver {
            None
        } else {
            Some(self.turn)
        }
    }

    pub fn start_hand<R: Rng>(&mut self, rng: &mut R) -> Vec<Outgoing> {
        self.pass_direction = PassDirection::for_hand(self.hand_number);
        self.hand_number += 1;
        self.hands = hearts::deal_hand(rng);
        self.passes_submitted = [None; NUM_PLAYERS];
        self.hearts_broken = false;
        self.is_first_trick = true;
        self.trick = Trick::default();
        self.points_taken = [0; NUM_PLAYERS];

        if self.pass_direction == PassDirection::None {
            self.phase = Phase::Playing;
            self.turn = self.seat_holding_two_of_clubs();
        } else {
            self.phase = Phase::Passing;
        }

        self.hands
            .iter()
            .enumerate()
            .map(|(seat, hand)| {
                let msg = wire::DealHand {
                    pass_direction: pass_direction_wire(self.pass_direction),
                    cards: hand.clone(),
                };
                Outgoing::to(Recipient::Seat(seat), message_type::DEAL_HAND, msg.to_bytes())
            })
            .collect()
    }

    fn seat_holding_two_of_clubs(&self) -> usize {
        const TWO_OF_CLUBS: Card = 1 * 13 + 0; // suit index 1 (Clubs) * 13 + rank 0 (two)
        self.hands
            .iter()
            .position(|hand| hand.contains(&TWO_OF_CLUBS))
            .expect("two of clubs must be in exactly one hand")
    }

    pub fn handle_pass(&mut self, seat: usize, cards: [Card; NUM_CARDS_IN_PASS]) -> Result<Vec<Outgoing>> {
        if self.phase != Phase::Passing {
            return Err(Error::Protocol("pass received outside the pass phase"));
        }
        if self.passes_submitted[seat].is_some() {
            return Err(Error::Protocol("seat already submitted a pass this hand"));
        }
        if cards.iter().any(|c| !self.hands[seat].contains(c)) {
            return Err(Error::Protocol("seat does not hold all of the passed cards"));
        }
        self.passes_submitted[seat] = Some(cards);

        if self.passes_submitted.iter().all(Option::is_some) {
            return Ok(self.exchange_passes());
        }
        Ok(Vec::new())
    }

    fn exchange_passes(&mut self) -> Vec<Outgoing> {
        let passes = self.passes_submitted;
        for seat in 0..NUM_PLAYERS {
            let cards = passes[seat].expect("all passes present");
            self.hands[seat].retain(|c| !cards.contains(c));
        }
        let mut out = Vec::with_capacity(NUM_PLAYERS);
        for seat in 0..NUM_PLAYERS {
            let cards = passes[seat].expect("all passes present");
            let target = self.pass_direction.target_seat(seat).expect("passing phase implies a direction");
            self.hands[target].extend_from_slice(&cards);
            out.push(Outgoing::to(Recipient::Seat(target), message_type::CARDS_RECEIVED, cards.to_vec()));
        }

        self.phase = Phase::Playing;
        self.turn = self.seat_holding_two_of_clubs();
        out
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

        let was_leading = self.trick.lead_suit().is_none();
        if was_leading {
            if !hearts::can_lead(card, &self.hands[seat], self.hearts_broken, self.is_first_trick) {
                return Err(Error::Protocol("cannot lead that card yet"));
            }
        } else if !self.trick.follows_suit(card, &self.hands[seat]) {
            return Err(Error::Protocol("must follow the lead suit"));
        }

        self.hands[seat].retain(|&c| c != card);
        self.trick.set(seat, card);
        if hearts::breaks_hearts(card, was_leading) {
            self.hearts_broken = true;
        }

        let mut out = vec![Outgoing::to(
            Recipient::All,
            message_type::PLAY,
            wire::Play { seat: seat as i16, card }.to_bytes(),
        )];

        if self.trick.is_finished() {
            let winner = self.trick.winner();
            self.points_taken[winner] += self.trick.points();
            out.push(Outgoing::to(Recipient::All, message_type::TRICK_COMPLETE, vec![winner as u8]));
            self.trick = Trick::default();
            self.turn = winner;
            self.is_first_trick = false;

            if self.hands.iter().all(|h| h.is_empty()) {
                out.extend(self.finish_hand(rng));
            }
        } else {
            self.turn = (self.turn + 1) % NUM_PLAYERS;
        }

        Ok(out)
    }

    /// Scores the completed hand and, unless the game just ended, deals
    /// the next one (`original_source/.../HeartsMatch.cpp` loops hands
    /// until a player reaches the losing score, spec §4.3.2).
    fn finish_hand<R: Rng>(&mut self, rng: &mut R) -> Vec<Outgoing> {
        let deltas = hearts::score_hand(self.points_taken);
        for seat in 0..NUM_PLAYERS {
            self.totals[seat] += deltas[seat];
        }

        let mut payload = Vec::with_capacity(NUM_PLAYERS * 2);
        for &t in &self.totals {
            payload.extend_from_slice(&t.to_le_bytes());
        }
        let mut out = vec![Outgoing::to(Recipient::All, message_type::HAND_COMPLETE, payload)];

        if hearts::is_game_over(self.totals) {
            self.phase = Phase::GameOver;
            let winner = hearts::winning_seat(self.totals);
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
    pub fn auto_play<R: Rng>(&mut self, seat: usize, rng: &mut R) -> Result<Vec<Outgoing>> {
        match self.phase {
            Phase::Passing => {
                if self.passes_submitted[seat].is_some() {
                    return Ok(Vec::new());
                }
                let mut hand = self.hands[seat].clone();
                hand.sort_by_key(|&c| relay_protocol::card::rank_of(c));
                let mut chosen = [0u8; NUM_CARDS_IN_PASS];
                chosen.copy_from_slice(&hand[hand.len() - NUM_CARDS_IN_PASS..]);
                self.handle_pass(seat, chosen)
            }
            Phase::Playing => {
                if self.current_turn() != Some(seat) {
                    return Ok(Vec::new());
                }
                let card = hearts::auto_card(&self.hands[seat], &self.trick, self.hearts_broken, self.is_first_trick);
                self.handle_play(seat, card, rng)
            }
            Phase::GameOver => Ok(Vec::new()),
        }
    }
}

fn pass_direction_wire(direction: PassDirection) -> i16 {
    match direction {
        PassDirection::None => 0,
        PassDirection::Left => 1,
        PassDirection::Right => 2,
        PassDirection::Across => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    #[test]
    fn first_hand_has_no_pass_and_starts_with_two_of_clubs_holder() {
        let mut m = HeartsMatch::new();
        let mut rng = Pcg32::seed_from_u64(7);
        m.start_hand(&mut rng);
        assert_eq!(m.pass_direction, PassDirection::None);
        let leader = m.turn;
        const TWO_OF_CLUBS: Card = 13;
        assert!(m.hands[leader].contains(&TWO_OF_CLUBS));
    }

    #[test]
    fn second_hand_requires_all_four_passes_before_play_starts() {
        let mut m = HeartsMatch::new();
        let mut rng = Pcg32::seed_from_u64(7);
        m.start_hand(&mut rng);
        m.hand_number = 1;
        m.start_hand(&mut rng);
        assert_eq!(m.pass_direction, PassDirection::Left);

        for seat in 0..3 {
            let mut cards = [0u8; NUM_CARDS_IN_PASS];
            cards.copy_from_slice(&m.hands[seat][0..NUM_CARDS_IN_PASS]);
            let out = m.handle_pass(seat, cards).unwrap();
            assert!(out.is_empty());
        }
        let mut cards = [0u8; NUM_CARDS_IN_PASS];
        cards.copy_from_slice(&m.hands[3][0..NUM_CARDS_IN_PASS]);
        let out = m.handle_pass(3, cards).unwrap();
        assert_eq!(out.len(), NUM_PLAYERS);
    }
}
