//! Shared error taxonomy (spec §7), reused by both crates so a connection
//! task and the lobby manager can match on the same variants.

use thiserror::Error;

/// A library-internal, matchable error. Task-level call sites in
/// `relay-server` wrap these in `anyhow::Result` once the precise variant
/// stops mattering (see `DESIGN.md`).
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded-wait lock timed out or was abandoned (§5).
    #[error("fatal lock error: {0}")]
    FatalLock(&'static str),

    /// The peer closed the socket, or a read/send timed out.
    #[error("client disconnected")]
    ClientDisconnected,

    /// Malformed framing, invalid signature, checksum mismatch, illegal
    /// state transition, or an invalid move.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Bad config XML or a bad CLI value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A peer asked to be disconnected cleanly (e.g. a banner-ad request).
    #[error("logical disconnect: {0}")]
    LogicalDisconnect(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
