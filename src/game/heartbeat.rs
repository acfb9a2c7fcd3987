//! Heartbeat Monitor
//!
//! Alive hunters must prove liveness before a rolling deadline by scanning
//! another alive player's code. Deadlines are kept in one ordered index so a
//! single periodic sweep finds everything that expired.

use std::collections::BTreeSet;

use crate::game::events::GameEvent;
use crate::game::state::{EliminationReason, Game, GameError, Phase, PlayerNumber, Timestamp};

/// Ordered `(deadline, player)` index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatIndex {
    entries: BTreeSet<(Timestamp, PlayerNumber)>,
}

impl HeartbeatIndex {
    /// Track a deadline.
    pub fn insert(&mut self, deadline: Timestamp, player: PlayerNumber) {
        self.entries.insert((deadline, player));
    }

    /// Stop tracking a deadline.
    pub fn remove(&mut self, deadline: Timestamp, player: PlayerNumber) {
        self.entries.remove(&(deadline, player));
    }

    /// Players whose deadline is strictly before `now`, earliest first.
    pub fn expired(&self, now: Timestamp) -> Vec<PlayerNumber> {
        self.entries
            .range(..(now, 0))
            .map(|&(_, player)| player)
            .collect()
    }

    /// Earliest tracked deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.iter().next().map(|&(deadline, _)| deadline)
    }

    /// Number of tracked deadlines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Why a heartbeat proof was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// Game is not hunting.
    #[error("heartbeats are only accepted while hunting")]
    NotHunting,

    /// Submitting player is eliminated.
    #[error("player is not alive")]
    NotAlive,

    /// Player scanned their own code.
    #[error("cannot scan yourself")]
    SelfScan,

    /// Scanned number is not in this game.
    #[error("scanned player is not registered")]
    UnknownPlayer,

    /// Scanned player is eliminated.
    #[error("scanned player is not alive")]
    ScannedNotAlive,

    /// Deadline already passed.
    #[error("heartbeat deadline already passed")]
    HeartbeatExpired,
}

impl HeartbeatError {
    /// Stable client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            HeartbeatError::NotHunting => "not-hunting",
            HeartbeatError::NotAlive => "not-alive",
            HeartbeatError::SelfScan => "self-scan",
            HeartbeatError::UnknownPlayer => "unknown-player",
            HeartbeatError::ScannedNotAlive => "scanned-not-alive",
            HeartbeatError::HeartbeatExpired => "heartbeat-expired",
        }
    }
}

impl Game {
    /// Give every alive player their first deadline.
    pub(crate) fn arm_heartbeats(&mut self, started_at: Timestamp, interval_secs: u64) {
        self.heartbeats.clear();
        let deadline = started_at.saturating_add(interval_secs);
        for player in self.players.values_mut().filter(|p| p.alive) {
            player.last_heartbeat_at = None;
            player.heartbeat_deadline = Some(deadline);
            self.heartbeats.insert(deadline, player.number);
        }
    }

    /// Accept a scan as liveness proof and push the deadline forward.
    pub fn submit_heartbeat(
        &mut self,
        number: PlayerNumber,
        scanned: PlayerNumber,
        now: Timestamp,
        interval_secs: u64,
    ) -> Result<Vec<GameEvent>, HeartbeatError> {
        if self.phase != Phase::Hunting {
            return Err(HeartbeatError::NotHunting);
        }
        let player = self.players.get(&number).ok_or(HeartbeatError::NotAlive)?;
        if !player.alive {
            return Err(HeartbeatError::NotAlive);
        }
        if scanned == number {
            return Err(HeartbeatError::SelfScan);
        }
        if player.heartbeat_deadline.is_some_and(|d| d < now) {
            return Err(HeartbeatError::HeartbeatExpired);
        }
        let other = self.players.get(&scanned).ok_or(HeartbeatError::UnknownPlayer)?;
        if !other.alive {
            return Err(HeartbeatError::ScannedNotAlive);
        }

        let until = now.saturating_add(interval_secs);
        if let Some(player) = self.players.get_mut(&number) {
            if let Some(old) = player.heartbeat_deadline.replace(until) {
                self.heartbeats.remove(old, number);
            }
            player.last_heartbeat_at = Some(now);
        }
        self.heartbeats.insert(until, number);

        Ok(vec![
            GameEvent::HeartbeatScanned { player: number, scanned },
            GameEvent::HeartbeatRefreshed { player: number, until },
        ])
    }

    /// Eliminate players whose deadline passed, earliest deadline first and
    /// lower number first on ties.
    ///
    /// The last alive player is never timed out: with one player left the
    /// hunt is decided and only waits for the ledger.
    pub fn sweep_heartbeats(&mut self, now: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        if self.phase != Phase::Hunting || !self.heartbeats.next_deadline().is_some_and(|d| d < now) {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for number in self.heartbeats.expired(now) {
            if self.alive_count <= 1 {
                break;
            }
            tracing::info!(game_id = self.id, player = number, "Heartbeat deadline missed");
            events.extend(self.eliminate(number, EliminationReason::HeartbeatTimeout, None, now, false)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::fixtures::game_with_players;

    const INTERVAL: u64 = 600;

    fn hunting_game(n: u8, started_at: Timestamp) -> Game {
        let mut game = game_with_players(1, n);
        game.phase = Phase::Hunting;
        game.build_ring();
        game.arm_heartbeats(started_at, INTERVAL);
        game
    }

    #[test]
    fn test_index_expired_is_strict() {
        let mut index = HeartbeatIndex::default();
        index.insert(100, 2);
        index.insert(100, 1);
        index.insert(200, 3);
        assert!(index.expired(100).is_empty());
        assert_eq!(index.expired(101), vec![1, 2]);
        assert_eq!(index.next_deadline(), Some(100));
        index.remove(100, 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_scan_refreshes_deadline() {
        let mut game = hunting_game(3, 1_000);
        let events = game.submit_heartbeat(1, 2, 1_300, INTERVAL).unwrap();
        assert_eq!(events[1], GameEvent::HeartbeatRefreshed { player: 1, until: 1_900 });

        let p = game.player(1).unwrap();
        assert_eq!(p.heartbeat_deadline, Some(1_900));
        assert_eq!(p.last_heartbeat_at, Some(1_300));
        assert_eq!(game.heartbeats.len(), 3);
    }

    #[test]
    fn test_invalid_proofs_do_not_refresh() {
        let mut game = hunting_game(3, 1_000);
        assert_eq!(game.submit_heartbeat(1, 1, 1_100, INTERVAL), Err(HeartbeatError::SelfScan));
        assert_eq!(game.submit_heartbeat(1, 9, 1_100, INTERVAL), Err(HeartbeatError::UnknownPlayer));
        assert_eq!(game.submit_heartbeat(1, 2, 1_601, INTERVAL), Err(HeartbeatError::HeartbeatExpired));

        game.eliminate(3, EliminationReason::Zone, None, 1_050, false).unwrap();
        assert_eq!(game.submit_heartbeat(1, 3, 1_100, INTERVAL), Err(HeartbeatError::ScannedNotAlive));
        assert_eq!(game.submit_heartbeat(3, 1, 1_100, INTERVAL), Err(HeartbeatError::NotAlive));

        assert_eq!(game.player(1).unwrap().heartbeat_deadline, Some(1_600));

        game.phase = Phase::Pregame;
        assert_eq!(game.submit_heartbeat(1, 2, 1_100, INTERVAL), Err(HeartbeatError::NotHunting));
    }

    #[test]
    fn test_sweep_eliminates_expired() {
        let mut game = hunting_game(4, 1_000);
        game.submit_heartbeat(1, 2, 1_500, INTERVAL).unwrap();
        game.submit_heartbeat(2, 1, 1_500, INTERVAL).unwrap();

        assert!(game.sweep_heartbeats(1_600).unwrap().is_empty());
        let events = game.sweep_heartbeats(1_601).unwrap();

        let eliminated: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::PlayerEliminated { player, reason: EliminationReason::HeartbeatTimeout, eliminator: None } => Some(*player),
                _ => None,
            })
            .collect();
        assert_eq!(eliminated, vec![3, 4]);
        assert_eq!(game.alive_count, 2);
        assert_eq!(game.heartbeats.len(), 2);
        crate::game::ring::check_single_cycle(&game.players).unwrap();
    }

    #[test]
    fn test_nobody_scans_leaves_one_survivor() {
        let mut game = hunting_game(4, 1_000);
        let events = game.sweep_heartbeats(1_601).unwrap();

        let eliminated: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                GameEvent::PlayerEliminated { player, .. } => Some(*player),
                _ => None,
            })
            .collect();
        assert_eq!(eliminated, vec![1, 2, 3]);
        assert_eq!(game.alive_count, 1);
        assert_eq!(game.alive_numbers(), vec![4]);
        assert_eq!(game.compute_winners().first, Some(4));
        assert!(game.sweep_heartbeats(5_000).unwrap().is_empty());
    }

    #[test]
    fn test_survivor_kept_while_end_is_pending() {
        let mut game = hunting_game(3, 1_000);
        game.submit_heartbeat(1, 2, 1_010, INTERVAL).unwrap();

        game.sweep_heartbeats(1_601).unwrap();
        assert_eq!(game.alive_numbers(), vec![1]);

        assert!(game.sweep_heartbeats(1_611).unwrap().is_empty());
        assert!(game.sweep_heartbeats(10_000).unwrap().is_empty());
        assert_eq!(game.alive_count, 1);
        let winners = game.compute_winners();
        assert_eq!(winners.first, Some(1));
        assert_eq!(winners.second, Some(3));
        assert_eq!(winners.third, Some(2));
    }

    #[test]
    fn test_rebuilt_index_matches() {
        let mut game = hunting_game(3, 1_000);
        game.submit_heartbeat(2, 3, 1_200, INTERVAL).unwrap();
        let expected = game.heartbeats.clone();
        game.rebuild_indexes();
        assert_eq!(game.heartbeats, expected);
    }
}
