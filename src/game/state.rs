//! Game State Definitions
//!
//! Records for a single game and its players.
//! Uses BTreeMap everywhere so iteration order (and therefore serialised
//! bytes and state hashes) is identical between a live run and a rebuild.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::geo::GeoPoint;
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::events::{GameEvent, IntentKey};
use crate::game::heartbeat::HeartbeatIndex;
use crate::game::ring;
use crate::game::zone::ZoneState;
use crate::ledger::events::EventKey;

/// Ledger-assigned game identifier.
pub type GameId = u64;

/// Dense per-game player number, assigned in registration order starting at 1.
pub type PlayerNumber = u32;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Total basis points across all prize shares.
pub const TOTAL_BPS: u32 = 10_000;

// =============================================================================
// ADDRESS
// =============================================================================

/// 20-byte wallet address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse from a hex string, with or without `0x` prefix.
    pub fn from_hex(s: &str) -> Option<Self> {
        let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let bytes = hex::decode(trimmed).ok()?;
        if bytes.len() != 20 {
            return None;
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }

    /// Lowercase hex with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..10])
    }
}

// =============================================================================
// GAME CONFIG (immutable, set once at creation)
// =============================================================================

/// Prize distribution in basis points. The platform keeps the remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrizeSplit {
    /// Share for first place.
    pub first_bps: u16,
    /// Share for second place.
    pub second_bps: u16,
    /// Share for third place.
    pub third_bps: u16,
    /// Share for the top killer.
    pub kills_bps: u16,
    /// Share for the game creator.
    pub creator_bps: u16,
}

impl PrizeSplit {
    /// Sum of the explicit shares.
    pub fn allocated_bps(&self) -> u32 {
        self.first_bps as u32
            + self.second_bps as u32
            + self.third_bps as u32
            + self.kills_bps as u32
            + self.creator_bps as u32
    }

    /// Platform share (remainder up to 10000).
    pub fn platform_bps(&self) -> u32 {
        TOTAL_BPS.saturating_sub(self.allocated_bps())
    }
}

/// One step of the zone shrink schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkStep {
    /// Seconds after hunting starts.
    pub offset_secs: u64,
    /// Zone radius from this step on.
    pub radius_m: u32,
}

impl ShrinkStep {
    /// Create a step.
    pub const fn new(offset_secs: u64, radius_m: u32) -> Self {
        Self { offset_secs, radius_m }
    }
}

/// Immutable game configuration as recorded on the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Display title.
    pub title: String,
    /// Entry fee in minor units.
    pub entry_fee: u128,
    /// Minimum players for the game to start.
    pub min_players: u32,
    /// Registration cap.
    pub max_players: u32,
    /// Registration closes at this time.
    pub registration_deadline: Timestamp,
    /// Earliest start time.
    pub game_start_time: Timestamp,
    /// Maximum duration after start time before the game expires.
    pub max_duration_secs: u64,
    /// Creator wallet.
    pub creator: Address,
    /// Zone center.
    pub zone_center: GeoPoint,
    /// Check-in meeting point.
    pub meeting_point: GeoPoint,
    /// Prize distribution.
    pub prize_split: PrizeSplit,
    /// Zone shrink schedule, relative to hunting start.
    pub shrink_schedule: Vec<ShrinkStep>,
}

/// Reasons a game configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    /// Prize shares exceed 10000 bps.
    #[error("prize shares exceed {TOTAL_BPS} bps: {0}")]
    PrizeSplitOverflow(u32),

    /// Player limits are inconsistent.
    #[error("invalid player limits: min {min}, max {max}")]
    PlayerLimits { min: u32, max: u32 },

    /// Registration closes after start.
    #[error("registration deadline is after start time")]
    DeadlineOrder,

    /// Schedule is empty.
    #[error("shrink schedule is empty")]
    EmptySchedule,

    /// First step is not at offset 0.
    #[error("first shrink step must be at offset 0")]
    ScheduleStart,

    /// Offsets not strictly increasing or radii not strictly decreasing.
    #[error("shrink schedule not ordered at step {0}")]
    ScheduleOrder(usize),
}

impl GameConfig {
    /// Check every creation-time invariant.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let allocated = self.prize_split.allocated_bps();
        if allocated > TOTAL_BPS {
            return Err(ConfigValidationError::PrizeSplitOverflow(allocated));
        }
        if self.min_players < 2 || self.min_players > self.max_players {
            return Err(ConfigValidationError::PlayerLimits {
                min: self.min_players,
                max: self.max_players,
            });
        }
        if self.registration_deadline > self.game_start_time {
            return Err(ConfigValidationError::DeadlineOrder);
        }
        let first = self.shrink_schedule.first().ok_or(ConfigValidationError::EmptySchedule)?;
        if first.offset_secs != 0 {
            return Err(ConfigValidationError::ScheduleStart);
        }
        for (i, pair) in self.shrink_schedule.windows(2).enumerate() {
            if pair[1].offset_secs <= pair[0].offset_secs || pair[1].radius_m >= pair[0].radius_m {
                return Err(ConfigValidationError::ScheduleOrder(i + 1));
            }
        }
        Ok(())
    }

    /// Time after which an unstarted game may be expired.
    pub fn expiry_deadline(&self) -> Timestamp {
        self.game_start_time.saturating_add(self.max_duration_secs)
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase. `Checkin`, `Pregame` and `Hunting` are off-chain
/// refinements of the ledger's single "active" phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Accepting registrations.
    #[default]
    Registration,
    /// Players must check in at the meeting point.
    Checkin,
    /// Short wait before targets are handed out.
    Pregame,
    /// Hunt in progress.
    Hunting,
    /// Finished with winners.
    Ended,
    /// Cancelled, refunds available.
    Cancelled,
}

impl Phase {
    /// Whether the phase accepts no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended | Phase::Cancelled)
    }

    /// Off-chain sub-phase name, if any.
    pub fn sub_phase(self) -> Option<&'static str> {
        match self {
            Phase::Checkin => Some("checkin"),
            Phase::Pregame => Some("pregame"),
            Phase::Hunting => Some("hunting"),
            _ => None,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Registration => "registration",
            Phase::Checkin => "checkin",
            Phase::Pregame => "pregame",
            Phase::Hunting => "hunting",
            Phase::Ended => "ended",
            Phase::Cancelled => "cancelled",
        }
    }

    fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Why a player left the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EliminationReason {
    /// Killed by their hunter.
    Kill = 0,
    /// Missed the check-in window.
    NoCheckin = 1,
    /// Missed a heartbeat deadline.
    HeartbeatTimeout = 2,
    /// Stayed outside the zone past the grace period.
    Zone = 3,
}

impl EliminationReason {
    /// Wire/ledger string.
    pub fn as_str(self) -> &'static str {
        match self {
            EliminationReason::Kill => "kill",
            EliminationReason::NoCheckin => "no-checkin",
            EliminationReason::HeartbeatTimeout => "heartbeat-timeout",
            EliminationReason::Zone => "zone",
        }
    }

    /// Ledger reason code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a ledger reason code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EliminationReason::Kill),
            1 => Some(EliminationReason::NoCheckin),
            2 => Some(EliminationReason::HeartbeatTimeout),
            3 => Some(EliminationReason::Zone),
            _ => None,
        }
    }
}

/// Elimination record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    /// Why.
    pub reason: EliminationReason,
    /// Who, for kills.
    pub eliminator: Option<PlayerNumber>,
    /// When. Overwritten with the ledger timestamp once confirmed.
    pub at: Timestamp,
    /// Whether the ledger has recorded it.
    pub confirmed: bool,
}

/// State of a single player in a game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Dense player number.
    pub number: PlayerNumber,
    /// Wallet address.
    pub address: Address,
    /// Is player still alive?
    pub alive: bool,
    /// Confirmed kills.
    pub kills: u32,
    /// Current target (hunting only).
    pub target: Option<PlayerNumber>,
    /// Current hunter (hunting only).
    pub hunter: Option<PlayerNumber>,
    /// Checked in at the meeting point.
    pub checked_in: bool,
    /// Last successful heartbeat.
    pub last_heartbeat_at: Option<Timestamp>,
    /// Current heartbeat deadline.
    pub heartbeat_deadline: Option<Timestamp>,
    /// Set once eliminated.
    pub elimination: Option<Elimination>,
    /// Last reported location.
    pub last_location: Option<GeoPoint>,
    /// First time the player was seen outside the current zone.
    pub outside_zone_since: Option<Timestamp>,
}

impl Player {
    /// Create a freshly registered player.
    pub fn new(number: PlayerNumber, address: Address) -> Self {
        Self {
            number,
            address,
            alive: true,
            kills: 0,
            target: None,
            hunter: None,
            checked_in: false,
            last_heartbeat_at: None,
            heartbeat_deadline: None,
            elimination: None,
            last_location: None,
            outside_zone_since: None,
        }
    }

    /// Elimination timestamp, if eliminated.
    pub fn eliminated_at(&self) -> Option<Timestamp> {
        self.elimination.map(|e| e.at)
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.number);
        hasher.update_bytes(self.address.as_bytes());
        hasher.update_bool(self.alive);
        hasher.update_u32(self.kills);
        hasher.update_opt_u32(self.target);
        hasher.update_opt_u32(self.hunter);
        hasher.update_bool(self.checked_in);
        match &self.elimination {
            Some(e) => {
                hasher.update_u8(1);
                hasher.update_u8(e.reason.code());
                hasher.update_opt_u32(e.eliminator);
                hasher.update_u64(e.at);
                hasher.update_bool(e.confirmed);
            }
            None => hasher.update_u8(0),
        }
    }
}

// =============================================================================
// GAME
// =============================================================================

/// Final standings as recorded on the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Winners {
    /// First place.
    pub first: Option<PlayerNumber>,
    /// Second place.
    pub second: Option<PlayerNumber>,
    /// Third place.
    pub third: Option<PlayerNumber>,
    /// Most kills.
    pub top_killer: Option<PlayerNumber>,
}

/// Per-phase deadlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deadlines {
    /// Registration closes.
    pub registration: Timestamp,
    /// Check-in window closes.
    pub checkin: Option<Timestamp>,
    /// Pregame window closes (hunting starts).
    pub pregame: Option<Timestamp>,
    /// Unstarted game may be expired.
    pub expiry: Timestamp,
}

/// One row of the leaderboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaderboardRow {
    /// Player number.
    pub player_number: PlayerNumber,
    /// Kills.
    pub kills: u32,
    /// Alive flag.
    pub is_alive: bool,
    /// Elimination time.
    pub eliminated_at: Option<Timestamp>,
}

/// Game record errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Game already ended or cancelled.
    #[error("game {0} is terminal")]
    Terminal(GameId),

    /// Operation not allowed in the current phase.
    #[error("expected phase {expected}, game is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    /// Address already registered.
    #[error("address {0} already registered")]
    AlreadyRegistered(Address),

    /// Registration cap reached.
    #[error("game is full")]
    GameFull,

    /// No such player number.
    #[error("unknown player #{0}")]
    UnknownPlayer(PlayerNumber),

    /// No player with this address.
    #[error("address {0} is not registered")]
    UnknownAddress(Address),
}

/// Complete state of a game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    /// Ledger game id.
    pub id: GameId,
    config: GameConfig,
    /// Current phase.
    pub phase: Phase,
    /// Players by number.
    pub players: BTreeMap<PlayerNumber, Player>,
    /// Address index.
    pub addresses: BTreeMap<Address, PlayerNumber>,
    /// Number of players still alive.
    pub alive_count: u32,
    /// Entry fees collected.
    pub total_collected: u128,
    /// Final standings.
    pub winners: Option<Winners>,
    /// Phase deadlines.
    pub deadlines: Deadlines,
    /// Ledger timestamp of GameStarted.
    pub started_at: Option<Timestamp>,
    /// When hunting began.
    pub hunting_started_at: Option<Timestamp>,
    /// When the game became terminal.
    pub terminal_at: Option<Timestamp>,
    /// Geofence.
    pub zone: ZoneState,
    /// Player numbers in elimination order.
    pub elimination_order: Vec<PlayerNumber>,
    /// Last ledger event applied to this game.
    pub last_applied: Option<EventKey>,
    /// Next activity-log sequence number.
    pub activity_seq: u64,
    /// Heartbeat deadline index, rebuilt from players on load.
    #[serde(skip)]
    pub heartbeats: HeartbeatIndex,
    /// Ledger intents already submitted, with submission time.
    #[serde(skip)]
    pub intents_sent: BTreeMap<IntentKey, Timestamp>,
}

impl Game {
    /// Create a game from its ledger configuration.
    pub fn new(id: GameId, config: GameConfig) -> Self {
        let deadlines = Deadlines {
            registration: config.registration_deadline,
            checkin: None,
            pregame: None,
            expiry: config.expiry_deadline(),
        };
        let zone = ZoneState::initial(&config);

        Self {
            id,
            config,
            phase: Phase::Registration,
            players: BTreeMap::new(),
            addresses: BTreeMap::new(),
            alive_count: 0,
            total_collected: 0,
            winners: None,
            deadlines,
            started_at: None,
            hunting_started_at: None,
            terminal_at: None,
            zone,
            elimination_order: Vec::new(),
            last_applied: None,
            activity_seq: 0,
            heartbeats: HeartbeatIndex::default(),
            intents_sent: BTreeMap::new(),
        }
    }

    /// Immutable configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Registered player count.
    pub fn player_count(&self) -> u32 {
        self.players.len() as u32
    }

    /// Checked-in player count.
    pub fn checked_in_count(&self) -> u32 {
        self.players.values().filter(|p| p.checked_in).count() as u32
    }

    /// Get a player by number.
    pub fn player(&self, number: PlayerNumber) -> Option<&Player> {
        self.players.get(&number)
    }

    /// Get a player by wallet address.
    pub fn player_by_address(&self, address: &Address) -> Option<&Player> {
        self.addresses.get(address).and_then(|n| self.players.get(n))
    }

    /// Player number for an address.
    pub fn number_of(&self, address: &Address) -> Option<PlayerNumber> {
        self.addresses.get(address).copied()
    }

    /// Alive player numbers in ascending order.
    pub fn alive_numbers(&self) -> Vec<PlayerNumber> {
        self.players.values().filter(|p| p.alive).map(|p| p.number).collect()
    }

    /// Error if the game accepts no more mutation.
    pub fn ensure_mutable(&self) -> Result<(), GameError> {
        if self.phase.is_terminal() {
            Err(GameError::Terminal(self.id))
        } else {
            Ok(())
        }
    }

    /// Error unless the game is in `expected`.
    pub fn ensure_phase(&self, expected: Phase) -> Result<(), GameError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(GameError::WrongPhase { expected, actual: self.phase })
        }
    }

    /// Add a registered player.
    pub fn register_player(&mut self, address: Address) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        self.ensure_phase(Phase::Registration)?;
        if self.addresses.contains_key(&address) {
            return Err(GameError::AlreadyRegistered(address));
        }
        if self.player_count() >= self.config.max_players {
            return Err(GameError::GameFull);
        }

        let number = self.player_count() + 1;
        self.players.insert(number, Player::new(number, address));
        self.addresses.insert(address, number);
        self.alive_count += 1;
        self.total_collected = self.total_collected.saturating_add(self.config.entry_fee);

        Ok(vec![GameEvent::PlayerRegistered {
            player: number,
            player_count: self.player_count(),
        }])
    }

    /// Eliminate a player and repair the ring.
    ///
    /// Eliminating an already-dead player is not an error: with `confirmed`
    /// set it marks the existing record as ledger-confirmed and adopts the
    /// ledger timestamp, otherwise it is a no-op.
    pub fn eliminate(
        &mut self,
        number: PlayerNumber,
        reason: EliminationReason,
        eliminator: Option<PlayerNumber>,
        at: Timestamp,
        confirmed: bool,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        let player = self.players.get_mut(&number).ok_or(GameError::UnknownPlayer(number))?;

        if !player.alive {
            if confirmed {
                if let Some(elimination) = player.elimination.as_mut() {
                    elimination.confirmed = true;
                    elimination.at = at;
                }
            }
            return Ok(Vec::new());
        }

        player.alive = false;
        player.elimination = Some(Elimination { reason, eliminator, at, confirmed });
        player.outside_zone_since = None;
        let deadline = player.heartbeat_deadline.take();

        self.alive_count = self.alive_count.saturating_sub(1);
        self.elimination_order.push(number);
        if let Some(deadline) = deadline {
            self.heartbeats.remove(deadline, number);
        }

        let mut events = vec![GameEvent::PlayerEliminated { player: number, eliminator, reason }];

        if self.phase == Phase::Hunting {
            if let Some(repair) = ring::splice_out(&mut self.players, number) {
                if repair.new_target != repair.hunter {
                    events.push(GameEvent::TargetAssigned {
                        hunter: repair.hunter,
                        target: repair.new_target,
                    });
                    events.push(GameEvent::HunterUpdated {
                        player: repair.new_target,
                        hunter: repair.hunter,
                    });
                }
            }
        } else if let Some(p) = self.players.get_mut(&number) {
            p.target = None;
            p.hunter = None;
        }

        events.push(GameEvent::LeaderboardChanged);
        Ok(events)
    }

    /// Apply a ledger-recorded kill.
    ///
    /// The ledger is authoritative, so this does not re-adjudicate; local
    /// validation happens before the kill is submitted.
    pub fn record_kill(
        &mut self,
        hunter: PlayerNumber,
        target: PlayerNumber,
        at: Timestamp,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.ensure_mutable()?;
        if !self.players.contains_key(&target) {
            return Err(GameError::UnknownPlayer(target));
        }
        let hunter_player = self.players.get_mut(&hunter).ok_or(GameError::UnknownPlayer(hunter))?;
        hunter_player.kills += 1;
        let hunter_kills = hunter_player.kills;

        let mut events = vec![GameEvent::KillRecorded { hunter, target, hunter_kills }];

        let target_alive = self.players.get(&target).is_some_and(|p| p.alive);
        if target_alive {
            events.extend(self.eliminate(target, EliminationReason::Kill, Some(hunter), at, true)?);
        } else if let Some(victim) = self.players.get_mut(&target) {
            // Ledger credited a kill on a player we had already removed locally
            victim.elimination = Some(Elimination {
                reason: EliminationReason::Kill,
                eliminator: Some(hunter),
                at,
                confirmed: true,
            });
            events.push(GameEvent::LeaderboardChanged);
        }

        Ok(events)
    }

    /// Whether every elimination has been recorded on the ledger.
    pub fn eliminations_confirmed(&self) -> bool {
        self.players
            .values()
            .filter_map(|p| p.elimination)
            .all(|e| e.confirmed)
    }

    /// Winners derived from current state.
    ///
    /// First is the sole survivor, second and third the last players
    /// eliminated, top killer the most kills with ties to the lower number.
    pub fn compute_winners(&self) -> Winners {
        let first = if self.alive_count == 1 {
            self.players.values().find(|p| p.alive).map(|p| p.number)
        } else {
            None
        };
        let mut eliminated = self.elimination_order.iter().rev().copied();
        let second = eliminated.next();
        let third = eliminated.next();

        let top_killer = self.players
            .values()
            .filter(|p| p.kills > 0)
            .max_by(|a, b| a.kills.cmp(&b.kills).then(b.number.cmp(&a.number)))
            .map(|p| p.number);

        Winners { first, second, third, top_killer }
    }

    /// Leaderboard: kills desc, alive first, then player number.
    pub fn leaderboard(&self) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = self.players
            .values()
            .map(|p| LeaderboardRow {
                player_number: p.number,
                kills: p.kills,
                is_alive: p.alive,
                eliminated_at: p.eliminated_at(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.kills
                .cmp(&a.kills)
                .then(b.is_alive.cmp(&a.is_alive))
                .then(a.player_number.cmp(&b.player_number))
        });
        rows
    }

    /// Rebuild skipped indexes after deserialisation.
    pub fn rebuild_indexes(&mut self) {
        self.heartbeats = HeartbeatIndex::default();
        for player in self.players.values() {
            if let (true, Some(deadline)) = (player.alive, player.heartbeat_deadline) {
                self.heartbeats.insert(deadline, player.number);
            }
        }
    }

    /// Compute hash of ledger-reproducible state.
    ///
    /// Heartbeat timestamps and locations are excluded: they are off-chain
    /// telemetry and cannot be recovered from ledger history.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.id, |hasher| {
            hasher.update_u8(self.phase.code());
            for player in self.players.values() {
                player.hash_into(hasher);
            }
            hasher.update_u32(self.alive_count);
            hasher.update_u128(self.total_collected);
            match &self.winners {
                Some(w) => {
                    hasher.update_u8(1);
                    hasher.update_opt_u32(w.first);
                    hasher.update_opt_u32(w.second);
                    hasher.update_opt_u32(w.third);
                    hasher.update_opt_u32(w.top_killer);
                }
                None => hasher.update_u8(0),
            }
            hasher.update_opt_u64(self.deadlines.checkin);
            hasher.update_opt_u64(self.deadlines.pregame);
            hasher.update_opt_u64(self.hunting_started_at);
            hasher.update_point(self.zone.center);
            hasher.update_u32(self.zone.radius_m);
            hasher.update_opt_u64(self.zone.next_shrink_at);
            for number in &self.elimination_order {
                hasher.update_u32(*number);
            }
        })
    }

    /// Serialised snapshot, used for storage and byte-level comparison.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Restore from a snapshot, rebuilding indexes.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let mut game: Game = bincode::deserialize(bytes)?;
        game.rebuild_indexes();
        Ok(game)
    }

    /// Take the next activity-log sequence number.
    pub fn next_activity_seq(&mut self) -> u64 {
        let seq = self.activity_seq;
        self.activity_seq += 1;
        seq
    }
}

// =============================================================================
// TEST FIXTURES
// =============================================================================


// =============================================================================
// TESTS
// =============================================================================
