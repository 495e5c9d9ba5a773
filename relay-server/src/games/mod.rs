//! Per-game engine dispatch (spec §9 "Dynamic dispatch across game
//! subclasses"): a capability set selected by the declared `Game` token,
//! replacing the original's class hierarchy.

pub mod board;
pub mod hearts;
pub mod spades;

use relay_protocol::game::Game;

/// Who an [`Outgoing`] message should be delivered to. A game engine
/// never writes to a socket itself; it only describes *what* to send and
/// *to whom*, leaving delivery to `crate::match_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Seat(usize),
    AllExcept(usize),
}

#[derive(Debug, Clone)]
pub struct Outgoing {
    pub recipient: Recipient,
    pub msg_type: i16,
    pub payload: Vec<u8>,
}

impl Outgoing {
    pub fn to(recipient: Recipient, msg_type: i16, payload: Vec<u8>) -> Outgoing {
        Outgoing { recipient, msg_type, payload }
    }
}

/// Mutable per-match game state, dispatched to the concrete engine for
/// the declared game (spec §4.3.1-§4.3.3).
pub enum Engine {
    Spades(spades::SpadesMatch),
    Hearts(hearts::HeartsMatch),
    Board(board::BoardMatch),
}

impl Engine {
    pub fn new(game: Game, count_nil_overtricks: bool) -> Engine {
        match game {
            Game::Spades => Engine::Spades(spades::SpadesMatch::new(count_nil_overtricks)),
            Game::Hearts => Engine::Hearts(hearts::HeartsMatch::new()),
            Game::Backgammon | Game::Checkers | Game::Reversi => Engine::Board(board::BoardMatch::new(game)),
        }
    }
}
