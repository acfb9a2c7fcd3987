//! Game Events
//!
//! Facts produced by game mutations. Every mutation returns the events it
//! caused, in the order they happened; the broadcast gateway renders them to
//! subscribers and the activity log stores them.
//!
//! Also defines the ledger intents a game wants submitted.

use serde::{Serialize, Deserialize};
use crate::game::state::{EliminationReason, PlayerNumber, Timestamp, Winners};

/// Who an event is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every subscriber of the game.
    Game,
    /// Only connections authenticated as this player.
    Player(PlayerNumber),
}

/// A state-changing fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Player joined during registration.
    PlayerRegistered {
        player: PlayerNumber,
        player_count: u32,
    },

    /// Game started on the ledger; check-in window open.
    CheckinStarted {
        ends_at: Timestamp,
        duration_secs: u64,
    },

    /// Player checked in.
    CheckedIn {
        player: PlayerNumber,
        checked_in_count: u32,
        player_count: u32,
    },

    /// Check-in closed; pregame window open.
    PregameStarted {
        ends_at: Timestamp,
        duration_secs: u64,
        checked_in_count: u32,
        player_count: u32,
    },

    /// Ring built, hunt begins.
    HuntingStarted {
        started_at: Timestamp,
        heartbeat_interval_secs: u64,
    },

    /// Hunter has a new target.
    TargetAssigned {
        hunter: PlayerNumber,
        target: PlayerNumber,
    },

    /// Player is hunted by someone new.
    HunterUpdated {
        player: PlayerNumber,
        hunter: PlayerNumber,
    },

    /// Ledger recorded a kill.
    KillRecorded {
        hunter: PlayerNumber,
        target: PlayerNumber,
        hunter_kills: u32,
    },

    /// Player removed from play.
    PlayerEliminated {
        player: PlayerNumber,
        eliminator: Option<PlayerNumber>,
        reason: EliminationReason,
    },

    /// Zone moved to its next step.
    ZoneShrunk {
        radius_m: u32,
        next_shrink_at: Option<Timestamp>,
        next_radius_m: Option<u32>,
    },

    /// Player is outside the zone.
    ZoneWarning {
        player: PlayerNumber,
        seconds_remaining: u64,
        distance_to_edge_m: i64,
    },

    /// Heartbeat deadline pushed forward.
    HeartbeatRefreshed {
        player: PlayerNumber,
        until: Timestamp,
    },

    /// Scan accepted as liveness proof.
    HeartbeatScanned {
        player: PlayerNumber,
        scanned: PlayerNumber,
    },

    /// Kills or alive flags changed.
    LeaderboardChanged,

    /// Final result recorded.
    GameEnded {
        winners: Winners,
    },

    /// Game cancelled.
    GameCancelled,
}

impl GameEvent {
    /// Recipients of this event.
    pub fn audience(&self) -> Audience {
        match self {
            GameEvent::TargetAssigned { hunter, .. } => Audience::Player(*hunter),
            GameEvent::HunterUpdated { player, .. } => Audience::Player(*player),
            GameEvent::ZoneWarning { player, .. } => Audience::Player(*player),
            GameEvent::HeartbeatRefreshed { player, .. } => Audience::Player(*player),
            GameEvent::HeartbeatScanned { player, .. } => Audience::Player(*player),
            _ => Audience::Game,
        }
    }

    /// Whether the event is worth an activity-log entry.
    ///
    /// Per-player liveness chatter is not.
    pub fn is_activity(&self) -> bool {
        !matches!(
            self,
            GameEvent::ZoneWarning { .. }
                | GameEvent::HeartbeatRefreshed { .. }
                | GameEvent::HeartbeatScanned { .. }
                | GameEvent::LeaderboardChanged
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::PlayerRegistered { .. } => "player_registered",
            GameEvent::CheckinStarted { .. } => "checkin_started",
            GameEvent::CheckedIn { .. } => "checked_in",
            GameEvent::PregameStarted { .. } => "pregame_started",
            GameEvent::HuntingStarted { .. } => "hunting_started",
            GameEvent::TargetAssigned { .. } => "target_assigned",
            GameEvent::HunterUpdated { .. } => "hunter_updated",
            GameEvent::KillRecorded { .. } => "kill_recorded",
            GameEvent::PlayerEliminated { .. } => "player_eliminated",
            GameEvent::ZoneShrunk { .. } => "zone_shrunk",
            GameEvent::ZoneWarning { .. } => "zone_warning",
            GameEvent::HeartbeatRefreshed { .. } => "heartbeat_refreshed",
            GameEvent::HeartbeatScanned { .. } => "heartbeat_scanned",
            GameEvent::LeaderboardChanged => "leaderboard_changed",
            GameEvent::GameEnded { .. } => "game_ended",
            GameEvent::GameCancelled => "game_cancelled",
        }
    }
}

// =============================================================================
// LEDGER INTENTS
// =============================================================================

/// A ledger call the game needs made on its behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerIntent {
    /// Start time reached with enough players.
    StartGame,
    /// Registration closed with too few players.
    TriggerCancellation,
    /// Never started before expiry.
    TriggerExpiry,
    /// Record a local elimination.
    EliminatePlayer {
        player: PlayerNumber,
        reason: EliminationReason,
    },
    /// Record the final result.
    EndGame {
        winners: Winners,
    },
}

impl LedgerIntent {
    /// Throttle key.
    pub fn key(&self) -> IntentKey {
        match self {
            LedgerIntent::StartGame => IntentKey::Start,
            LedgerIntent::TriggerCancellation => IntentKey::Cancel,
            LedgerIntent::TriggerExpiry => IntentKey::Expire,
            LedgerIntent::EliminatePlayer { player, .. } => IntentKey::Eliminate(*player),
            LedgerIntent::EndGame { .. } => IntentKey::End,
        }
    }
}

/// Identity of an intent for resubmission throttling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntentKey {
    /// startGame
    Start,
    /// triggerCancellation
    Cancel,
    /// triggerExpiry
    Expire,
    /// eliminatePlayer for one player
    Eliminate(PlayerNumber),
    /// endGame
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_routing() {
        let target = GameEvent::TargetAssigned { hunter: 3, target: 5 };
        assert_eq!(target.audience(), Audience::Player(3));

        let hunter = GameEvent::HunterUpdated { player: 5, hunter: 3 };
        assert_eq!(hunter.audience(), Audience::Player(5));

        let kill = GameEvent::KillRecorded { hunter: 3, target: 4, hunter_kills: 1 };
        assert_eq!(kill.audience(), Audience::Game);
    }

    #[test]
    fn test_liveness_chatter_not_logged() {
        assert!(!GameEvent::HeartbeatRefreshed { player: 1, until: 10 }.is_activity());
        assert!(!GameEvent::LeaderboardChanged.is_activity());
        assert!(GameEvent::GameCancelled.is_activity());
    }

    #[test]
    fn test_intent_keys_distinguish_players() {
        let a = LedgerIntent::EliminatePlayer { player: 1, reason: EliminationReason::Zone };
        let b = LedgerIntent::EliminatePlayer { player: 2, reason: EliminationReason::Zone };
        assert_ne!(a.key(), b.key());
        assert_eq!(LedgerIntent::StartGame.key(), IntentKey::Start);
    }
}
