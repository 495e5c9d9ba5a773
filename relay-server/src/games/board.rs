//! Thin relay engine for Backgammon, Checkers, and Reversi (spec
//! §4.3.3): the server validates message sequencing and seat ownership
//! of the current move but does not replay board semantics. Host-seat
//! `StateTransaction`s are trusted and relayed verbatim to the other
//! peer.

use super::{Outgoing, Recipient};
use rand::Rng;
use relay_protocol::error::{Error, Result};
use relay_protocol::game::Game;
use relay_protocol::protocol::{self, DiceRollResponse, StateTransaction};

/// `Transaction::tag` values recognized for Backgammon (spec §4.3.3
/// "structural shape of each `StateTransaction` kind"). Checkers and
/// Reversi carry no such structure and are relayed without inspecting
/// `tag` at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackgammonKind {
    Board,
    Dice,
    DoubleCube,
    Settings,
    ReadyForNewMatch,
}

impl BackgammonKind {
    fn from_tag(tag: i32) -> Option<BackgammonKind> {
        match tag {
            0 => Some(BackgammonKind::Board),
            1 => Some(BackgammonKind::Dice),
            2 => Some(BackgammonKind::DoubleCube),
            3 => Some(BackgammonKind::Settings),
            4 => Some(BackgammonKind::ReadyForNewMatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CheckIn,
    InitialState,
    Playing,
    Ended,
}

pub struct BoardMatch {
    game: Game,
    required_seats: usize,
    checked_in: Vec<bool>,
    ready_for_new_match: Vec<bool>,
    current_mover: usize,
    phase: Phase,
}

impl BoardMatch {
    pub fn new(game: Game) -> BoardMatch {
        let required_seats = game.required_player_count();
        BoardMatch {
            game,
            required_seats,
            checked_in: vec![false; required_seats],
            ready_for_new_match: vec![false; required_seats],
            current_mover: 0,
            phase: Phase::CheckIn,
        }
    }

    pub fn current_turn(&self) -> Option<usize> {
        match self.phase {
            Phase::Playing => Some(self.current_mover),
            _ => None,
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Seat has entered the `check-in` phase (spec §4.3.3). Once every
    /// seat has checked in the match is ready for its initial state.
    pub fn handle_check_in(&mut self, seat: usize) -> Result<Vec<Outgoing>> {
        if self.phase != Phase::CheckIn {
            return Err(Error::Protocol("check-in received outside the check-in phase"));
        }
        self.checked_in[seat] = true;
        if self.checked_in.iter().all(|&c| c) {
            self.phase = Phase::InitialState;
        }
        Ok(Vec::new())
    }

    /// Relays a seat's authoritative `StateTransaction` after checking
    /// it owns the current move (spec §4.3.3). Seat 0 is the host and
    /// is the only seat permitted to send the initial board state.
    pub fn handle_state_transaction(&mut self, seat: usize, txn: StateTransaction) -> Result<Vec<Outgoing>> {
        if txn.seat != seat as i32 {
            return Err(Error::Protocol("StateTransaction seat does not match the sender"));
        }

        match self.phase {
            Phase::CheckIn => return Err(Error::Protocol("StateTransaction received before check-in completed")),
            Phase::Ended => return Err(Error::Protocol("StateTransaction received after the match ended")),
            Phase::InitialState => {
                if seat != 0 {
                    return Err(Error::Protocol("only the host seat may send the initial StateTransaction"));
                }
                self.phase = Phase::Playing;
            }
            Phase::Playing => {
                if seat != self.current_mover {
                    return Err(Error::Protocol("StateTransaction received out of turn"));
                }
            }
        }

        let ends_turn = if self.game == Game::Backgammon {
            self.validate_backgammon_shape(&txn)?
        } else {
            true
        };

        if self.phase == Phase::Playing && ends_turn {
            self.current_mover = (self.current_mover + 1) % self.required_seats;
        }

        Ok(vec![Outgoing::to(Recipient::AllExcept(seat), 0, txn.to_bytes())])
    }

    /// `DiceRollRequest` (spec §8 scenario 2, Backgammon only): the server
    /// rolls both dice itself rather than trusting a client-submitted
    /// value, since nothing stops a peer lying about its own roll. This
    /// is the one exception to "the server does not replay board
    /// semantics" (§4.3.3) — it does not touch `StateTransaction` at all.
    pub fn handle_dice_roll<R: Rng>(&mut self, seat: usize, rng: &mut R) -> Result<Vec<Outgoing>> {
        if self.game != Game::Backgammon {
            return Err(Error::Protocol("DiceRollRequest is only valid for Backgammon"));
        }
        if self.phase != Phase::Playing || seat != self.current_mover {
            return Err(Error::Protocol("DiceRollRequest received out of turn"));
        }
        let response = DiceRollResponse {
            seat: seat as i16,
            dice1: rng.gen_range(1, 7),
            dice2: rng.gen_range(1, 7),
        };
        Ok(vec![Outgoing::to(Recipient::All, protocol::board_message::DICE_ROLL_RESPONSE, response.to_bytes())])
    }

    /// Backgammon transactions must carry a recognized `tag`; a `Board`
    /// entry is an actual move and ends the sender's turn, while
    /// `Dice`/`DoubleCube`/`Settings` precede it without doing so.
    /// `ReadyForNewMatch` never ends a turn.
    fn validate_backgammon_shape(&mut self, txn: &StateTransaction) -> Result<bool> {
        let mut ends_turn = false;
        for entry in &txn.transactions {
            let kind = BackgammonKind::from_tag(entry.tag).ok_or(Error::Protocol("unrecognized Backgammon StateTransaction kind"))?;
            match kind {
                BackgammonKind::Board => ends_turn = true,
                BackgammonKind::ReadyForNewMatch => {
                    self.ready_for_new_match[txn.seat as usize] = true;
                    if self.ready_for_new_match.iter().all(|&r| r) {
                        self.phase = Phase::Ended;
                    }
                }
                BackgammonKind::Dice | BackgammonKind::DoubleCube | BackgammonKind::Settings => {}
            }
        }
        Ok(ends_turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::protocol::Transaction;

    fn txn(seat: i32, tag: i32, kind: i32) -> StateTransaction {
        StateTransaction {
            user_id: 1,
            seat,
            tag,
            transactions: vec![Transaction { tag: kind, index: 0, value: 0 }],
        }
    }

    #[test]
    fn checkers_relays_without_kind_validation() {
        let mut m = BoardMatch::new(Game::Checkers);
        m.handle_check_in(0).unwrap();
        m.handle_check_in(1).unwrap();
        assert_eq!(m.phase, Phase::InitialState);

        let out = m.handle_state_transaction(0, txn(0, 0, 99)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(m.phase, Phase::Playing);
        assert_eq!(m.current_turn(), Some(1));
    }

    #[test]
    fn backgammon_rejects_out_of_turn_transaction() {
        let mut m = BoardMatch::new(Game::Backgammon);
        m.handle_check_in(0).unwrap();
        m.handle_check_in(1).unwrap();
        m.handle_state_transaction(0, txn(0, 0, 0)).unwrap();
        assert!(m.handle_state_transaction(0, txn(0, 0, 0)).is_err());
    }

    #[test]
    fn backgammon_dice_does_not_end_turn_but_board_does() {
        let mut m = BoardMatch::new(Game::Backgammon);
        m.handle_check_in(0).unwrap();
        m.handle_check_in(1).unwrap();
        m.handle_state_transaction(0, txn(0, 0, 0)).unwrap(); // initial board state from the host ends seat 0's turn
        assert_eq!(m.current_turn(), Some(1));

        // seat 1 rolls dice: does not end turn
        let out = m.handle_state_transaction(1, txn(1, 0, 1)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(m.current_turn(), Some(1));

        // seat 1 plays a board move: ends turn
        m.handle_state_transaction(1, txn(1, 0, 0)).unwrap();
        assert_eq!(m.current_turn(), Some(0));
    }

    #[test]
    fn dice_roll_is_server_generated_and_only_on_the_mover_turn() {
        use rand::SeedableRng;
        use rand_pcg::Pcg32;

        let mut m = BoardMatch::new(Game::Backgammon);
        m.handle_check_in(0).unwrap();
        m.handle_check_in(1).unwrap();
        m.handle_state_transaction(0, txn(0, 0, 0)).unwrap();
        assert_eq!(m.current_turn(), Some(1));

        let mut rng = Pcg32::seed_from_u64(3);
        assert!(m.handle_dice_roll(0, &mut rng).is_err());
        let out = m.handle_dice_roll(1, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].msg_type, protocol::board_message::DICE_ROLL_RESPONSE);
        let resp = DiceRollResponse::from_bytes(&out[0].payload).unwrap();
        assert!((1..=6).contains(&resp.dice1));
        assert!((1..=6).contains(&resp.dice2));
    }

    #[test]
    fn backgammon_rejects_unrecognized_kind() {
        let mut m = BoardMatch::new(Game::Backgammon);
        m.handle_check_in(0).unwrap();
        m.handle_check_in(1).unwrap();
        assert!(m.handle_state_transaction(0, txn(0, 0, 77)).is_err());
    }
}
