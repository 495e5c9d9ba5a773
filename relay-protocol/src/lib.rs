//! Shared wire protocol and game-engine logic for the relay server.
//!
//! This crate has no knowledge of sockets or tasks; it only knows how to
//! turn bytes into typed messages (and back) and how to run the rules of
//! each supported game. `relay-server` is the only crate that touches I/O.

pub mod card;
pub mod era;
pub mod error;
pub mod frame;
pub mod game;
pub mod hearts;
pub mod protocol;
pub mod spades;

pub use era::{Dialect, Era};
pub use error::Error;
