//! Zone Scheduler
//!
//! The play area is a circle around the configured center whose radius steps
//! down on a fixed schedule, relative to the moment hunting starts. Players
//! outside it are warned and, once outside longer than the grace period,
//! eliminated.

use serde::{Serialize, Deserialize};

use crate::core::geo::{GeoPoint, distance_to_edge_m};
use crate::game::events::GameEvent;
use crate::game::state::{
    EliminationReason, Game, GameConfig, GameError, Phase, PlayerNumber, ShrinkStep, Timestamp,
};

/// Current geofence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneState {
    /// Circle center.
    pub center: GeoPoint,
    /// Current radius.
    pub radius_m: u32,
    /// Index of the active schedule step.
    pub step: u32,
    /// When the next step applies, `None` once exhausted or before hunting.
    pub next_shrink_at: Option<Timestamp>,
    /// Radius of the next step.
    pub next_radius_m: Option<u32>,
}

impl ZoneState {
    /// Zone before hunting: full first-step radius, nothing scheduled.
    pub fn initial(config: &GameConfig) -> Self {
        Self {
            center: config.zone_center,
            radius_m: config.shrink_schedule.first().map_or(0, |s| s.radius_m),
            step: 0,
            next_shrink_at: None,
            next_radius_m: None,
        }
    }

    /// Zone for a hunt that started at `started_at`, evaluated at `now`.
    pub fn at(
        center: GeoPoint,
        schedule: &[ShrinkStep],
        started_at: Timestamp,
        now: Timestamp,
    ) -> Self {
        let elapsed = now.saturating_sub(started_at);
        let step = step_index(schedule, elapsed);
        let next = schedule.get(step + 1);
        Self {
            center,
            radius_m: schedule.get(step).map_or(0, |s| s.radius_m),
            step: step as u32,
            next_shrink_at: next.map(|s| started_at + s.offset_secs),
            next_radius_m: next.map(|s| s.radius_m),
        }
    }

    /// Signed distance to the edge, positive inside.
    pub fn distance_to_edge(&self, point: GeoPoint) -> f64 {
        distance_to_edge_m(self.center, self.radius_m, point)
    }

}

/// Index of the step active after `elapsed` seconds.
pub fn step_index(schedule: &[ShrinkStep], elapsed: u64) -> usize {
    schedule
        .iter()
        .rposition(|s| s.offset_secs <= elapsed)
        .unwrap_or(0)
}

/// Radius after `elapsed` seconds of hunting.
pub fn radius_at(schedule: &[ShrinkStep], elapsed: u64) -> u32 {
    schedule.get(step_index(schedule, elapsed)).map_or(0, |s| s.radius_m)
}

// =============================================================================
// GAME INTEGRATION
// =============================================================================

impl Game {
    /// Start the schedule at hunting start.
    pub(crate) fn start_zone(&mut self, started_at: Timestamp) {
        self.zone = ZoneState::at(
            self.config().zone_center,
            &self.config().shrink_schedule,
            started_at,
            started_at,
        );
    }

    /// Apply any shrink steps due by `now`.
    pub fn advance_zone(&mut self, now: Timestamp) -> Vec<GameEvent> {
        let Some(started_at) = self.hunting_started_at else {
            return Vec::new();
        };
        if self.phase != Phase::Hunting {
            return Vec::new();
        }
        let next = ZoneState::at(self.zone.center, &self.config().shrink_schedule, started_at, now);
        if next.step == self.zone.step {
            return Vec::new();
        }
        self.zone = next;
        vec![GameEvent::ZoneShrunk {
            radius_m: next.radius_m,
            next_shrink_at: next.next_shrink_at,
            next_radius_m: next.next_radius_m,
        }]
    }

    /// Record a player's reported location and enforce the zone.
    pub fn update_location(
        &mut self,
        number: PlayerNumber,
        point: GeoPoint,
        now: Timestamp,
        grace_secs: u64,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        let player = self.players.get_mut(&number).ok_or(GameError::UnknownPlayer(number))?;
        if !player.alive {
            return Ok(Vec::new());
        }
        player.last_location = Some(point);

        if self.phase != Phase::Hunting {
            return Ok(Vec::new());
        }
        let mut events = self.advance_zone(now);
        events.extend(self.enforce_zone(number, now, grace_secs, true)?);
        Ok(events)
    }

    /// Re-check every alive player's last known location, lowest number
    /// first. Stops once a single player is left.
    pub fn sweep_zone(&mut self, now: Timestamp, grace_secs: u64) -> Result<Vec<GameEvent>, GameError> {
        if self.phase != Phase::Hunting {
            return Ok(Vec::new());
        }
        let mut events = self.advance_zone(now);
        for number in self.alive_numbers() {
            if self.alive_count <= 1 {
                break;
            }
            events.extend(self.enforce_zone(number, now, grace_secs, false)?);
        }
        Ok(events)
    }

    fn enforce_zone(
        &mut self,
        number: PlayerNumber,
        now: Timestamp,
        grace_secs: u64,
        always_warn: bool,
    ) -> Result<Vec<GameEvent>, GameError> {
        let zone = self.zone;
        let Some(player) = self.players.get_mut(&number) else {
            return Err(GameError::UnknownPlayer(number));
        };
        if !player.alive {
            return Ok(Vec::new());
        }
        let Some(point) = player.last_location else {
            return Ok(Vec::new());
        };

        let edge = zone.distance_to_edge(point);
        if edge >= 0.0 {
            player.outside_zone_since = None;
            return Ok(Vec::new());
        }

        let first_seen = player.outside_zone_since.is_none();
        let since = *player.outside_zone_since.get_or_insert(now);
        let grace_ends = since.saturating_add(grace_secs);

        if grace_ends <= now {
            if self.alive_count <= 1 {
                return Ok(Vec::new());
            }
            tracing::info!(game_id = self.id, player = number, "Zone grace expired");
            return self.eliminate(number, EliminationReason::Zone, None, now, false);
        }

        if !(first_seen || always_warn) {
            return Ok(Vec::new());
        }
        let seconds_remaining = match zone.next_shrink_at {
            Some(at) => at.saturating_sub(now),
            None => grace_ends.saturating_sub(now),
        };
        Ok(vec![GameEvent::ZoneWarning {
            player: number,
            seconds_remaining,
            distance_to_edge_m: edge.round() as i64,
        }])
    }
}

// =============================================================================
// TESTS
// =============================================================================
