//! Phase State Machine
//!
//! ```text
//! registration -> checkin -> pregame -> hunting -> ended
//!       \____________\__________\______________-> cancelled
//! ```
//!
//! Ledger events drive registration -> checkin and the terminal states. The
//! check-in and pregame windows close on their stored deadlines, so calling
//! [`Game::advance_windows`] late yields exactly the state a punctual call
//! would have produced. Replay relies on this.

use serde::{Serialize, Deserialize};

use crate::core::geo::GeoPoint;
use crate::game::events::{GameEvent, LedgerIntent};
use crate::game::state::{
    EliminationReason, Game, GameError, Phase, PlayerNumber, Timestamp, Winners,
};

/// Off-chain pacing rules shared by all games.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRules {
    /// Check-in window length.
    pub checkin_secs: u64,
    /// Pregame window length.
    pub pregame_secs: u64,
    /// Heartbeat refresh interval.
    pub heartbeat_interval_secs: u64,
    /// How long a player may stay outside the zone.
    pub zone_grace_secs: u64,
    /// Max distance from the meeting point for check-in.
    pub checkin_radius_m: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            checkin_secs: 600,
            pregame_secs: 120,
            heartbeat_interval_secs: 600,
            zone_grace_secs: 60,
            checkin_radius_m: 150,
        }
    }
}

/// Why a check-in was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CheckinError {
    /// Check-in window not open.
    #[error("check-in is not open")]
    NotCheckinPhase,

    /// Player is not in this game.
    #[error("player is not registered in this game")]
    NotRegistered,

    /// Player already eliminated.
    #[error("player is not alive")]
    NotAlive,

    /// Player already checked in.
    #[error("already checked in")]
    AlreadyCheckedIn,

    /// Reported location too far from the meeting point.
    #[error("too far from the meeting point ({0} m)")]
    TooFar(u32),
}

impl CheckinError {
    /// Stable client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            CheckinError::NotCheckinPhase => "not-checkin-phase",
            CheckinError::NotRegistered => "not-registered",
            CheckinError::NotAlive => "not-alive",
            CheckinError::AlreadyCheckedIn => "already-checked-in",
            CheckinError::TooFar(_) => "too-far",
        }
    }
}

impl Game {
    // =========================================================================
    // LEDGER-DRIVEN TRANSITIONS
    // =========================================================================

    /// registration -> checkin, on a reconciled GameStarted.
    pub fn start(&mut self, at: Timestamp, rules: &GameRules) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        self.ensure_phase(Phase::Registration)?;

        let ends_at = at.saturating_add(rules.checkin_secs);
        self.phase = Phase::Checkin;
        self.started_at = Some(at);
        self.deadlines.checkin = Some(ends_at);
        tracing::info!(game_id = self.id, players = self.player_count(), ends_at, "Check-in opened");

        Ok(vec![GameEvent::CheckinStarted { ends_at, duration_secs: rules.checkin_secs }])
    }

    /// -> ended, on a reconciled GameEnded.
    pub fn end(&mut self, winners: Winners, at: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        if self.phase != Phase::Hunting {
            tracing::warn!(game_id = self.id, phase = %self.phase, "Game ended outside hunting");
        }
        self.phase = Phase::Ended;
        self.winners = Some(winners);
        self.terminal_at = Some(at);
        self.heartbeats.clear();
        tracing::info!(game_id = self.id, ?winners, "Game ended");

        Ok(vec![GameEvent::GameEnded { winners }])
    }

    /// -> cancelled, on a reconciled GameCancelled.
    pub fn cancel(&mut self, at: Timestamp) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        if self.phase == Phase::Hunting {
            tracing::warn!(game_id = self.id, "Ledger cancelled a game in hunting");
        }
        self.phase = Phase::Cancelled;
        self.terminal_at = Some(at);
        self.heartbeats.clear();
        tracing::info!(game_id = self.id, "Game cancelled");

        Ok(vec![GameEvent::GameCancelled])
    }

    // =========================================================================
    // TIME-DRIVEN TRANSITIONS
    // =========================================================================

    /// Close every window whose deadline is at or before `now`.
    pub fn advance_windows(&mut self, now: Timestamp, rules: &GameRules) -> Result<Vec<GameEvent>, GameError> {
        let mut events = Vec::new();
        loop {
            match (self.phase, self.deadlines.checkin, self.deadlines.pregame) {
                (Phase::Checkin, Some(deadline), _) if deadline <= now => {
                    events.extend(self.close_checkin(deadline, rules)?);
                }
                (Phase::Pregame, _, Some(deadline)) if deadline <= now => {
                    events.extend(self.start_hunting(deadline, rules));
                }
                (Phase::Hunting, _, _) => {
                    events.extend(self.advance_zone(now));
                    break;
                }
                _ => break,
            }
        }
        Ok(events)
    }

    /// Everything time-based: windows, heartbeats, zone.
    ///
    /// Heartbeat and zone sweeps depend on live telemetry, so this is never
    /// called during replay.
    pub fn tick(&mut self, now: Timestamp, rules: &GameRules) -> Result<Vec<GameEvent>, GameError> {
        if self.phase.is_terminal() {
            return Ok(Vec::new());
        }
        let mut events = self.advance_windows(now, rules)?;
        events.extend(self.sweep_heartbeats(now)?);
        events.extend(self.sweep_zone(now, rules.zone_grace_secs)?);
        Ok(events)
    }

    fn close_checkin(&mut self, at: Timestamp, rules: &GameRules) -> Result<Vec<GameEvent>, GameError> {
        let missing: Vec<PlayerNumber> = self.players
            .values()
            .filter(|p| p.alive && !p.checked_in)
            .map(|p| p.number)
            .collect();

        let mut events = Vec::new();
        for number in missing {
            events.extend(self.eliminate(number, EliminationReason::NoCheckin, None, at, false)?);
        }

        let ends_at = at.saturating_add(rules.pregame_secs);
        self.phase = Phase::Pregame;
        self.deadlines.pregame = Some(ends_at);
        tracing::info!(game_id = self.id, alive = self.alive_count, ends_at, "Pregame started");

        events.push(GameEvent::PregameStarted {
            ends_at,
            duration_secs: rules.pregame_secs,
            checked_in_count: self.checked_in_count(),
            player_count: self.player_count(),
        });
        Ok(events)
    }

    fn start_hunting(&mut self, at: Timestamp, rules: &GameRules) -> Vec<GameEvent> {
        self.phase = Phase::Hunting;
        self.hunting_started_at = Some(at);
        let ring = self.build_ring();
        self.arm_heartbeats(at, rules.heartbeat_interval_secs);
        self.start_zone(at);
        tracing::info!(game_id = self.id, ring_size = ring.len(), "Hunting started");

        vec![GameEvent::HuntingStarted {
            started_at: at,
            heartbeat_interval_secs: rules.heartbeat_interval_secs,
        }]
    }

    // =========================================================================
    // PLAYER ACTIONS
    // =========================================================================

    /// Check a player in at the meeting point.
    pub fn check_in(
        &mut self,
        number: Option<PlayerNumber>,
        location: Option<GeoPoint>,
        now: Timestamp,
        rules: &GameRules,
    ) -> Result<Vec<GameEvent>, CheckinError> {
        let open = self.phase == Phase::Checkin
            && self.deadlines.checkin.is_some_and(|deadline| now < deadline);
        if !open {
            return Err(CheckinError::NotCheckinPhase);
        }
        let meeting_point = self.config().meeting_point;
        let player = number
            .and_then(|n| self.players.get_mut(&n))
            .ok_or(CheckinError::NotRegistered)?;
        if !player.alive {
            return Err(CheckinError::NotAlive);
        }
        if player.checked_in {
            return Err(CheckinError::AlreadyCheckedIn);
        }
        if let Some(point) = location {
            let distance = point.distance_to(&meeting_point);
            if distance > rules.checkin_radius_m as f64 {
                return Err(CheckinError::TooFar(distance.round() as u32));
            }
            player.last_location = Some(point);
        }
        player.checked_in = true;
        let player = player.number;

        Ok(vec![GameEvent::CheckedIn {
            player,
            checked_in_count: self.checked_in_count(),
            player_count: self.player_count(),
        }])
    }

    // =========================================================================
    // LEDGER INTENTS
    // =========================================================================

    /// Ledger calls that are due and not submitted within `resubmit_secs`.
    ///
    /// Records the submission time of everything returned.
    pub fn due_intents(&mut self, now: Timestamp, resubmit_secs: u64) -> Vec<LedgerIntent> {
        let mut wanted = Vec::new();
        let config = self.config();

        match self.phase {
            Phase::Registration => {
                if now >= self.deadlines.expiry {
                    wanted.push(LedgerIntent::TriggerExpiry);
                } else if self.player_count() >= config.min_players && now >= config.game_start_time {
                    wanted.push(LedgerIntent::StartGame);
                } else if self.player_count() < config.min_players && now >= self.deadlines.registration {
                    wanted.push(LedgerIntent::TriggerCancellation);
                }
            }
            Phase::Checkin | Phase::Pregame | Phase::Hunting => {
                for player in self.players.values() {
                    if let Some(e) = player.elimination.filter(|e| !e.confirmed) {
                        wanted.push(LedgerIntent::EliminatePlayer { player: player.number, reason: e.reason });
                    }
                }
                if self.phase == Phase::Hunting && self.alive_count <= 1 && self.eliminations_confirmed() {
                    wanted.push(LedgerIntent::EndGame { winners: self.compute_winners() });
                }
            }
            Phase::Ended | Phase::Cancelled => {}
        }

        wanted.retain(|intent| {
            let key = intent.key();
            let due = self.intents_sent
                .get(&key)
                .map_or(true, |sent| now >= sent.saturating_add(resubmit_secs));
            if due {
                self.intents_sent.insert(key, now);
            }
            due
        });
        wanted
    }
}

// =============================================================================
// TESTS
// =============================================================================
