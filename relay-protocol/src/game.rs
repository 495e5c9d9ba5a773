//! Per-game static metadata (C2): required seat count, computer-player
//! support, and the per-game chat id range/nudge allowlist referenced by
//! §4.3 "Chat". Pure data, no engine behavior — the engines themselves
//! live in `spades` and `hearts`; Backgammon/Checkers/Reversi have no
//! engine module because the server only relays their `StateTransaction`s
//! (§4.3.3) rather than replaying board semantics.

use crate::era::Era;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    Backgammon,
    Checkers,
    Spades,
    Hearts,
    Reversi,
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Game::Backgammon => "Backgammon",
            Game::Checkers => "Checkers",
            Game::Spades => "Spades",
            Game::Hearts => "Hearts",
            Game::Reversi => "Reversi",
        })
    }
}

impl Game {
    /// Legacy `Game=` ticket tokens, per the fixed string table referenced
    /// in spec §4.2.1 (`wnsp` = Spades, the others follow the same
    /// "Zone" naming convention used by the shipped Legacy clients).
    pub fn from_legacy_token(token: &str) -> Option<Game> {
        match token {
            "wnsp" => Some(Game::Spades),
            "wnht" => Some(Game::Hearts),
            "wnbg" => Some(Game::Backgammon),
            "wnck" => Some(Game::Checkers),
            "wnrv" => Some(Game::Reversi),
            _ => None,
        }
    }

    pub fn legacy_token(self) -> &'static str {
        match self {
            Game::Spades => "wnsp",
            Game::Hearts => "wnht",
            Game::Backgammon => "wnbg",
            Game::Checkers => "wnck",
            Game::Reversi => "wnrv",
        }
    }

    /// Modern proxy handshakes identify the game via a 6-byte token
    /// (spec §4.2.2).
    pub fn from_modern_token(token: &[u8]) -> Option<Game> {
        match token {
            b"spades" => Some(Game::Spades),
            b"hearts" => Some(Game::Hearts),
            b"bckgmn" => Some(Game::Backgammon),
            b"checkr" => Some(Game::Checkers),
            b"revers" => Some(Game::Reversi),
            _ => None,
        }
    }

    pub fn required_player_count(self) -> usize {
        match self {
            Game::Backgammon | Game::Checkers | Game::Reversi => 2,
            Game::Spades | Game::Hearts => 4,
        }
    }

    /// Whether `DisconnectedPlayer` (§4.3) may substitute a computer
    /// player for this game. The original only ships autoplay for Spades
    /// and Hearts (§2's C3/C4); the thinner board engines have no AI.
    pub fn supports_computer_players(self) -> bool {
        matches!(self, Game::Spades | Game::Hearts)
    }

    /// Numeric game id used in the Modern `GameMessage` sub-header
    /// (`MsgGameMessage::gameID`).
    pub fn wire_id(self) -> u32 {
        match self {
            Game::Backgammon => 1,
            Game::Checkers => 2,
            Game::Spades => 3,
            Game::Hearts => 4,
            Game::Reversi => 5,
        }
    }

    /// Custom per-game chat id range, added on top of the common
    /// `1..=24` range shared by every game (§4.3 "Chat").
    pub fn custom_chat_range(self) -> std::ops::RangeInclusive<u32> {
        match self {
            Game::Spades => 256..=279,
            Game::Hearts => 256..=266,
            Game::Backgammon => 256..=270,
            Game::Checkers => 256..=260,
            Game::Reversi => 256..=260,
        }
    }

    /// Per-game "nudge" allowlist strings (distinct from numeric chat
    /// ids) accepted verbatim by Legacy chat validation.
    pub fn nudge_messages(self) -> &'static [&'static str] {
        match self {
            Game::Spades | Game::Hearts => &["SYS_NUDGE"],
            _ => &[],
        }
    }
}

pub const COMMON_CHAT_ID_RANGE: std::ops::RangeInclusive<u32> = 1..=24;

/// Base id Modern localized chat strings are looked up from
/// (`IDS_XPCHAT_BEGIN + id`, spec §4.3 "Chat").
pub const IDS_XPCHAT_BEGIN: u32 = 20_000;

/// Describes a connection's declared matchmaking key (era, game, skill),
/// used by the lobby's `FindLobby` predicate (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub era: Era,
    pub game: Game,
    pub skill: crate::era::Skill,
}
