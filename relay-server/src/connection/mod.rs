//! Per-connection state (C5, spec §3 "Connection", §4.2) shared between the
//! connection's own task and any match it is seated in.
//!
//! Grounded on the teacher's `ClientController` (`mahjong-server/src/client.rs`):
//! an actor-ish struct reached through a cheap, cloneable handle. The
//! teacher reaches its controller through an actor proxy generated by
//! `thespian`; since this crate talks directly to TCP sockets on
//! independent tasks rather than through a single-threaded actor runtime,
//! the handle here is a plain `Arc` guarding `tokio::sync::Mutex`/atomics
//! instead (spec §9 "coroutine/async shape").

pub mod legacy;
pub mod modern;

use crate::match_state::MatchShared;
use relay_protocol::{Dialect, Era};
use relay_protocol::era::Skill;
use relay_protocol::game::Game;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

/// Unique opaque user id, random 32-bit per spec §3.
pub type UserId = u32;

/// A connection's current protocol state. Legacy and Modern eras have
/// disjoint state sets (spec §4.2.1/§4.2.2); kept in one enum so a single
/// `ConnectionShared::state` field can describe either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    // Legacy era (§4.2.1)
    LegacyInitialized,
    LegacyJoining,
    LegacyJoiningConfirm,
    LegacyWaitingForOpponents,
    LegacyPlaying,

    // Modern era (§4.2.2)
    ModernInitialized,
    ModernUnconfigured,
    ModernWaitingForOpponents,
    ModernPlaying,
    ModernProxyDisconnected,
}

impl ConnState {
    /// Whether the 60-second idle timeout applies in this state (spec
    /// §4.2: not while waiting for opponents or actively playing).
    pub fn idle_timeout_applies(self) -> bool {
        !matches!(
            self,
            ConnState::LegacyWaitingForOpponents | ConnState::LegacyPlaying | ConnState::ModernWaitingForOpponents | ConnState::ModernPlaying
        )
    }
}

/// Declared matchmaking key, captured once the handshake/config phase
/// completes (spec §4.4 "Lookup").
#[derive(Debug, Clone, Copy)]
pub struct Declared {
    pub game: Game,
    pub skill: Skill,
}

/// Shared, non-owning-from-the-match's-perspective connection state (spec
/// §3 "Connection", §9 "Cyclic ownership").
///
/// Ownership: the global socket registry (`crate::registry::Registry`)
/// holds the single strong `Arc` for each connection's lifetime; a seated
/// `Match` holds only a `Weak` reference per seat, so a match can never
/// keep a dropped connection's resources alive.
pub struct ConnectionShared {
    pub id: UserId,
    pub remote_addr: SocketAddr,
    pub era: Era,
    pub dialect: AsyncMutex<Option<Dialect>>,
    pub declared: AsyncMutex<Option<Declared>>,
    pub session_guid: AsyncMutex<Option<u128>>,

    /// XOR session key (Modern only); starts at the handshake default.
    pub session_key: AtomicU32,
    /// Strictly monotonic outbound sequence id (Modern only, spec §8).
    pub sequence_id: AtomicU32,

    pub state: AsyncMutex<ConnState>,
    /// `-1` until seated.
    pub seat: AtomicI32,
    pub bound_match: AsyncMutex<Option<Weak<MatchShared>>>,

    /// Gate: set the moment the connection enters `WaitingForOpponents`
    /// (Legacy: after `AT`; Modern: after `ClientConfig`), strictly before
    /// a match could possibly reach `GameStart`, so a match broadcast can
    /// never race the client's own readiness onto the wire (spec §4.2.3).
    pub accepts_game_messages: AtomicBool,

    /// Guards the full read/write cycle of a single outbound frame so
    /// receive-driven and match-driven sends never interleave a partial
    /// frame (spec §4.2.3).
    pub send_half: AsyncMutex<WriteHalf<TcpStream>>,

    pub chat_enabled: AtomicBool,
}

impl ConnectionShared {
    pub fn new(id: UserId, remote_addr: SocketAddr, era: Era, send_half: WriteHalf<TcpStream>) -> Arc<ConnectionShared> {
        let initial_state = match era {
            Era::Legacy => ConnState::LegacyInitialized,
            Era::Modern => ConnState::ModernInitialized,
        };
        Arc::new(ConnectionShared {
            id,
            remote_addr,
            era,
            dialect: AsyncMutex::new(None),
            declared: AsyncMutex::new(None),
            session_guid: AsyncMutex::new(None),
            session_key: AtomicU32::new(relay_protocol::frame::DEFAULT_SECURITY_KEY),
            sequence_id: AtomicU32::new(0),
            state: AsyncMutex::new(initial_state),
            seat: AtomicI32::new(-1),
            bound_match: AsyncMutex::new(None),
            accepts_game_messages: AtomicBool::new(false),
            send_half: AsyncMutex::new(send_half),
            chat_enabled: AtomicBool::new(true),
        })
    }

    pub fn next_sequence_id(&self) -> u32 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn seat_index(&self) -> Option<usize> {
        let s = self.seat.load(Ordering::SeqCst);
        if s < 0 {
            None
        } else {
            Some(s as usize)
        }
    }

    pub fn set_seat(&self, seat: usize) {
        self.seat.store(seat as i32, Ordering::SeqCst);
    }

    /// Writes already-framed bytes to the socket under the send mutex
    /// (spec §4.2.3). Bounded by the 5-second lock timeout (spec §5); a
    /// timeout is a fatal lock error.
    pub async fn send_raw(&self, bytes: &[u8]) -> relay_protocol::error::Result<()> {
        use relay_protocol::error::Error;
        use tokio::io::AsyncWriteExt;

        let mut guard = tokio::time::timeout(std::time::Duration::from_secs(5), self.send_half.lock())
            .await
            .map_err(|_| Error::FatalLock("timed out acquiring connection send mutex"))?;
        guard.write_all(bytes).await.map_err(|_| Error::ClientDisconnected)?;
        Ok(())
    }

    /// Forces the socket closed (admin `k` kick, spec §6). The connection's
    /// own task observes the next read/write fail with `ClientDisconnected`
    /// and unwinds normally.
    pub async fn shutdown(&self) {
        use tokio::io::AsyncWriteExt;
        let _ = self.send_half.lock().await.shutdown().await;
    }

    pub async fn bind_match(&self, m: &Arc<MatchShared>) {
        *self.bound_match.lock().await = Some(Arc::downgrade(m));
    }

    pub async fn unbind_match(&self) {
        *self.bound_match.lock().await = None;
        self.seat.store(-1, Ordering::SeqCst);
    }

    /// The match this connection is seated in, if it is still alive
    /// (i.e. has not transitioned to `Ended` and been reaped).
    pub async fn live_match(&self) -> Option<Arc<MatchShared>> {
        self.bound_match.lock().await.as_ref().and_then(Weak::upgrade)
    }

    /// Blocks the calling task until `accepts_game_messages` is set, so a
    /// match broadcast never races the peer's `GameStart`/`GameInit` onto
    /// the wire (spec §4.2.3, §5 "accepts game messages gate").
    ///
    /// `tokio::sync::Notify` is unavailable on the tokio 0.2 line this
    /// crate is pinned to (added in 1.0); a short bounded poll of the
    /// flag stands in for it instead of pulling in a second runtime.
    pub async fn wait_accepts_game_messages(&self) -> relay_protocol::error::Result<()> {
        use relay_protocol::error::Error;

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !self.accepts_game_messages.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::FatalLock("timed out waiting for the accepts-game-messages gate"));
            }
            tokio::time::delay_for(std::time::Duration::from_millis(5)).await;
        }
        Ok(())
    }
}
