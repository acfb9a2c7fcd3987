//! Activity Log
//!
//! One entry per state-changing event, for "what happened in game N" queries.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Deserialize};

use crate::game::events::GameEvent;
use crate::game::state::{GameId, Timestamp};

/// A stored activity record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Game the event belongs to.
    pub game_id: GameId,
    /// Per-game sequence.
    pub seq: u64,
    /// When it happened.
    pub timestamp: Timestamp,
    /// What happened.
    pub event: GameEvent,
}

impl ActivityEntry {
    /// Human-readable line with an RFC 3339 timestamp.
    pub fn describe(&self) -> String {
        let when = DateTime::<Utc>::from_timestamp(self.timestamp as i64, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| self.timestamp.to_string());
        format!("{when} game {} #{}: {}", self.game_id, self.seq, summarize(&self.event))
    }
}

fn summarize(event: &GameEvent) -> String {
    match event {
        GameEvent::PlayerRegistered { player, player_count } => {
            format!("player #{player} registered ({player_count} total)")
        }
        GameEvent::CheckinStarted { ends_at, .. } => format!("check-in opened until {ends_at}"),
        GameEvent::CheckedIn { player, checked_in_count, player_count } => {
            format!("player #{player} checked in ({checked_in_count}/{player_count})")
        }
        GameEvent::PregameStarted { checked_in_count, player_count, .. } => {
            format!("pregame started with {checked_in_count}/{player_count} checked in")
        }
        GameEvent::HuntingStarted { .. } => "hunting started".to_string(),
        GameEvent::TargetAssigned { hunter, target } => format!("player #{hunter} now hunts #{target}"),
        GameEvent::HunterUpdated { player, hunter } => format!("player #{player} now hunted by #{hunter}"),
        GameEvent::KillRecorded { hunter, target, hunter_kills } => {
            format!("player #{hunter} killed #{target} ({hunter_kills} kills)")
        }
        GameEvent::PlayerEliminated { player, reason, .. } => {
            format!("player #{player} eliminated ({})", reason.as_str())
        }
        GameEvent::ZoneShrunk { radius_m, .. } => format!("zone shrank to {radius_m} m"),
        GameEvent::ZoneWarning { player, .. } => format!("player #{player} outside zone"),
        GameEvent::HeartbeatRefreshed { player, until } => format!("player #{player} heartbeat until {until}"),
        GameEvent::HeartbeatScanned { player, scanned } => format!("player #{player} scanned #{scanned}"),
        GameEvent::LeaderboardChanged => "leaderboard changed".to_string(),
        GameEvent::GameEnded { winners } => match winners.first {
            Some(first) => format!("game ended, winner #{first}"),
            None => "game ended without a winner".to_string(),
        },
        GameEvent::GameCancelled => "game cancelled".to_string(),
    }
}
