//! Lobby / match manager (C7, spec §4.4): finds or creates the
//! `WaitingForPlayers` match a newly-declared connection should join, and
//! periodically reaps matches that have reached `Ended`.
//!
//! Grounded on the teacher's `GameState` (`mahjong-server/src/game.rs`):
//! a single shared registry of live matches behind one lock, with a
//! maintenance tick that prunes finished entries. The teacher keys its
//! registry by table id alone; this one keys the scan by `(era, game,
//! skill)` since that is the lobby's own matchmaking predicate (§4.4
//! "Lookup").

use crate::config::Config;
use crate::match_state::{MatchShared, Phase};
use relay_protocol::era::{Era, Skill};
use relay_protocol::error::Result;
use relay_protocol::game::Game;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// How often [`Lobby::run_tick_loop`] sweeps every live match (spec §4.4
/// "Maintenance").
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct LobbyInner {
    next_index: u32,
    matches: Vec<Arc<MatchShared>>,
}

/// Shared match registry (spec §3 "Lobby"). One per server process.
pub struct Lobby {
    config: Arc<Config>,
    inner: AsyncMutex<LobbyInner>,
}

impl Lobby {
    pub fn new(config: Arc<Config>) -> Arc<Lobby> {
        Arc::new(Lobby {
            config,
            inner: AsyncMutex::new(LobbyInner { next_index: 0, matches: Vec::new() }),
        })
    }

    /// `FindOrCreateMatch` (spec §4.4 "Lookup"): scans existing
    /// `WaitingForPlayers` matches with a free seat for the first one
    /// matching `(era, game, skill)`, unless `skip_level_matching` widens
    /// the scan to ignore `skill`. Creates a fresh match if none matches.
    pub async fn find_or_create(self: &Arc<Self>, era: Era, game: Game, skill: Skill) -> Result<Arc<MatchShared>> {
        let skip_level_matching = self.config.snapshot().skip_level_matching;
        let allow_single_player = self.config.snapshot().allow_single_player;

        let mut inner = self.inner.lock().await;
        for m in &inner.matches {
            if m.era != era || m.game != game {
                continue;
            }
            if !skip_level_matching && m.skill != skill {
                continue;
            }
            if m.phase().await == Phase::WaitingForPlayers && m.has_free_seat().await {
                return Ok(m.clone());
            }
        }

        let index = inner.next_index;
        inner.next_index += 1;
        let m = MatchShared::new(index, era, game, skill, allow_single_player);
        inner.matches.push(m.clone());
        Ok(m)
    }

    /// Admin `d <index>` (spec §6): tears a match down immediately,
    /// releasing every seated/waiting connection back to an unbound state.
    pub async fn destroy_match(&self, index: u32) -> bool {
        let target = {
            let inner = self.inner.lock().await;
            inner.matches.iter().find(|m| m.index == index).cloned()
        };
        match target {
            Some(m) => {
                m.destroy().await;
                true
            }
            None => false,
        }
    }

    /// Admin `lm` (spec §6): a snapshot line per live match.
    pub async fn list_matches(&self) -> Vec<Arc<MatchShared>> {
        self.inner.lock().await.matches.clone()
    }

    /// Counts of waiting matches by `(era, game, skill)`, for the HTTP
    /// status page (spec §6 "HTTP status page").
    pub async fn waiting_counts(&self) -> Vec<(Era, Game, Skill, usize)> {
        let inner = self.inner.lock().await;
        let mut counts = Vec::new();
        for m in &inner.matches {
            if m.phase().await != Phase::WaitingForPlayers {
                continue;
            }
            let waiting = m.players_waiting().await;
            counts.push((m.era, m.game, m.skill, waiting));
        }
        counts
    }

    /// One maintenance sweep (spec §4.4 "Maintenance"): calls `update()`
    /// on every live match (advancing `GameOver -> Ended` once the
    /// disband timer elapses) and drops any that reached `Ended`.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        for m in &inner.matches {
            if let Err(err) = m.update().await {
                tracing::warn!(match_index = m.index, %err, "match maintenance tick failed");
            }
        }

        let mut still_alive = Vec::with_capacity(inner.matches.len());
        for m in std::mem::take(&mut inner.matches) {
            if m.is_ended().await {
                tracing::debug!(match_index = m.index, "reaping ended match");
            } else {
                still_alive.push(m);
            }
        }
        inner.matches = still_alive;
    }

    /// Runs [`Lobby::tick`] on [`TICK_INTERVAL`] until the process exits.
    /// Spawned once from `main` (spec §4.4 "Maintenance").
    pub async fn run_tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValues;

    fn lobby() -> Arc<Lobby> {
        Lobby::new(Arc::new(Config::new(ConfigValues::default())))
    }

    #[tokio::test]
    async fn reuses_a_waiting_match_of_the_same_key() {
        let lobby = lobby();
        let a = lobby.find_or_create(Era::Modern, Game::Checkers, Skill::Beginner).await.unwrap();
        let b = lobby.find_or_create(Era::Modern, Game::Checkers, Skill::Beginner).await.unwrap();
        assert_eq!(a.index, b.index);
    }

    #[tokio::test]
    async fn distinct_skill_gets_a_distinct_match_unless_skip_level_matching() {
        let lobby = lobby();
        let a = lobby.find_or_create(Era::Modern, Game::Checkers, Skill::Beginner).await.unwrap();
        let b = lobby.find_or_create(Era::Modern, Game::Checkers, Skill::Expert).await.unwrap();
        assert_ne!(a.index, b.index);
    }

    #[tokio::test]
    async fn destroy_match_reaches_an_unknown_connection_gracefully() {
        let lobby = lobby();
        assert!(!lobby.destroy_match(999).await);
        let m = lobby.find_or_create(Era::Modern, Game::Reversi, Skill::Intermediate).await.unwrap();
        assert!(lobby.destroy_match(m.index).await);
        assert!(m.is_ended().await);
    }

    #[tokio::test]
    async fn tick_reaps_ended_matches() {
        let lobby = lobby();
        let m = lobby.find_or_create(Era::Modern, Game::Reversi, Skill::Intermediate).await.unwrap();
        m.destroy().await;
        lobby.tick().await;
        assert!(lobby.list_matches().await.is_empty());
    }
}
