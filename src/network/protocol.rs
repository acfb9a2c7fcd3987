//! Protocol Messages
//!
//! JSON wire format for the WebSocket gateway. Both directions are closed
//! tagged enums keyed by `type`; payload fields are camelCase.

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::core::geo::GeoPoint;
use crate::game::state::{GameId, PlayerNumber, Timestamp};
use crate::game::zone::ZoneState;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Authenticate as a player of a game.
    #[serde(rename = "auth")]
    Auth(AuthRequest),

    /// Watch a game without authenticating.
    #[serde(rename = "subscribe")]
    Subscribe(SubscribeRequest),

    /// Check in at the meeting point.
    #[serde(rename = "checkin")]
    Checkin(CheckinRequest),

    /// Liveness proof by scanning another player.
    #[serde(rename = "heartbeat:scan")]
    HeartbeatScan(HeartbeatScanRequest),

    /// Location report.
    #[serde(rename = "location:update")]
    LocationUpdate(LocationUpdateRequest),

    /// Claim a kill on the current target.
    #[serde(rename = "kill:claim")]
    KillClaim(KillClaimRequest),

    /// Keep-alive.
    #[serde(rename = "ping")]
    Ping,
}

/// Every inbound type name.
pub const CLIENT_MESSAGE_TYPES: [&str; 7] = [
    "auth",
    "subscribe",
    "checkin",
    "heartbeat:scan",
    "location:update",
    "kill:claim",
    "ping",
];

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Signed session token.
    pub token: Option<String>,
    /// Bare wallet address (development mode only).
    pub address: Option<String>,
    /// Game to join.
    pub game_id: GameId,
}

/// Spectator subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Game to watch.
    pub game_id: GameId,
}

/// Check-in, optionally with the current location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRequest {
    /// Latitude in degrees.
    pub lat: Option<f64>,
    /// Longitude in degrees.
    pub lng: Option<f64>,
}

/// Coordinates missing a half or out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid location")]
pub struct InvalidLocation;

impl CheckinRequest {
    /// Location if both coordinates were sent.
    pub fn location(&self) -> Result<Option<GeoPoint>, InvalidLocation> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => GeoPoint::from_degrees(lat, lng).map(Some).ok_or(InvalidLocation),
            (None, None) => Ok(None),
            _ => Err(InvalidLocation),
        }
    }
}

impl LocationUpdateRequest {
    /// Parsed location.
    pub fn location(&self) -> Result<GeoPoint, InvalidLocation> {
        GeoPoint::from_degrees(self.lat, self.lng).ok_or(InvalidLocation)
    }
}

/// Heartbeat scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatScanRequest {
    /// Player whose code was scanned.
    pub scanned_player_number: PlayerNumber,
}

/// Location report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdateRequest {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// Kill claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillClaimRequest {
    /// Claimed victim.
    pub target_player_number: PlayerNumber,
}

/// Outcome of decoding an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Well-formed known message.
    Message(ClientMessage),
    /// Not JSON, no `type`, or a type we do not know. Dropped silently.
    Unknown,
    /// Known type with a bad payload.
    Invalid(String),
}

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Classify an inbound text frame.
    pub fn decode(text: &str) -> Inbound {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Inbound::Unknown;
        };
        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| CLIENT_MESSAGE_TYPES.contains(&t));
        if !known {
            return Inbound::Unknown;
        }
        match serde_json::from_value(value) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Invalid(e.to_string()),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Authenticated; current player view.
    #[serde(rename = "auth:success")]
    AuthSuccess(AuthSuccess),

    /// Kill recorded on the ledger.
    #[serde(rename = "kill:recorded")]
    KillRecorded(KillRecorded),

    /// Player eliminated.
    #[serde(rename = "player:eliminated")]
    PlayerEliminated(PlayerEliminated),

    /// New target for the recipient.
    #[serde(rename = "target:assigned")]
    TargetAssigned(TargetAssigned),

    /// New hunter for the recipient.
    #[serde(rename = "hunter:updated")]
    HunterUpdated(HunterUpdated),

    /// Zone shrank.
    #[serde(rename = "zone:shrink")]
    ZoneShrink(ZoneShrink),

    /// Recipient is outside the zone.
    #[serde(rename = "zone:warning")]
    ZoneWarning(ZoneWarning),

    /// Standings changed.
    #[serde(rename = "leaderboard:update")]
    LeaderboardUpdate(LeaderboardUpdate),

    /// Heartbeat deadline moved.
    #[serde(rename = "heartbeat:refreshed")]
    HeartbeatRefreshed(HeartbeatRefreshed),

    /// Scan accepted.
    #[serde(rename = "heartbeat:scan_success")]
    HeartbeatScanSuccess(HeartbeatScanSuccess),

    /// Scan refused.
    #[serde(rename = "heartbeat:error")]
    HeartbeatError(ErrorInfo),

    /// Pregame window opened.
    #[serde(rename = "game:pregame_started")]
    PregameStarted(PregameStarted),

    /// Hunt started; per-player assignment.
    #[serde(rename = "game:started")]
    GameStarted(GameStarted),

    /// Hunt started; public notice.
    #[serde(rename = "game:started_broadcast")]
    GameStartedBroadcast(GameStartedBroadcast),

    /// Final standings.
    #[serde(rename = "game:ended")]
    GameEnded(GameEnded),

    /// Game cancelled.
    #[serde(rename = "game:cancelled")]
    GameCancelled(GameCancelled),

    /// Check-in count changed.
    #[serde(rename = "checkin:update")]
    CheckinUpdate(CheckinUpdate),

    /// Check-in window opened.
    #[serde(rename = "game:checkin_started")]
    CheckinStarted(CheckinStarted),

    /// Player registered.
    #[serde(rename = "player:registered")]
    PlayerRegistered(PlayerRegistered),

    /// Rejected action or bad message.
    #[serde(rename = "error")]
    Error(ErrorInfo),
}

/// Public information about a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target's player number.
    pub player_number: PlayerNumber,
    /// Target's wallet address.
    pub address: String,
}

/// Zone geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    /// Center latitude.
    pub center_lat: f64,
    /// Center longitude.
    pub center_lng: f64,
    /// Current radius.
    pub radius_meters: u32,
    /// Next shrink time.
    pub next_shrink_at: Option<Timestamp>,
    /// Next radius.
    pub next_radius_meters: Option<u32>,
}

impl From<&ZoneState> for ZoneInfo {
    fn from(zone: &ZoneState) -> Self {
        Self {
            center_lat: zone.center.lat(),
            center_lng: zone.center.lon(),
            radius_meters: zone.radius_m,
            next_shrink_at: zone.next_shrink_at,
            next_radius_meters: zone.next_radius_m,
        }
    }
}

/// `auth:success` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    pub game_id: GameId,
    pub player_number: PlayerNumber,
    pub is_alive: bool,
    pub kills: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<TargetInfo>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hunter_player_number: Option<PlayerNumber>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_heartbeat_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checkin_ends_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pregame_ends_at: Option<Timestamp>,
}

/// `kill:recorded` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRecorded {
    pub hunter_number: PlayerNumber,
    pub target_number: PlayerNumber,
    pub hunter_kills: u32,
}

/// `player:eliminated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEliminated {
    pub player_number: PlayerNumber,
    pub eliminator_number: Option<PlayerNumber>,
    pub reason: String,
}

/// `target:assigned` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAssigned {
    pub target: TargetInfo,
    pub hunter_player_number: Option<PlayerNumber>,
}

/// `hunter:updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunterUpdated {
    pub hunter_player_number: PlayerNumber,
}

/// `zone:shrink` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneShrink {
    pub zone: ZoneInfo,
}

/// `zone:warning` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneWarning {
    pub seconds_remaining: u64,
    pub in_zone: bool,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub player_number: PlayerNumber,
    pub kills: u32,
    pub is_alive: bool,
    pub eliminated_at: Option<Timestamp>,
}

/// `leaderboard:update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardUpdate {
    pub entries: Vec<LeaderboardEntry>,
}

/// `heartbeat:refreshed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRefreshed {
    pub refreshed_until: Timestamp,
}

/// `heartbeat:scan_success` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatScanSuccess {
    pub scanned_player_number: PlayerNumber,
}

/// `game:pregame_started` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PregameStarted {
    pub pregame_duration_seconds: u64,
    pub pregame_ends_at: Timestamp,
    pub checked_in_count: u32,
    pub player_count: u32,
}

/// `game:started` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStarted {
    pub target: Option<TargetInfo>,
    pub hunter_player_number: Option<PlayerNumber>,
    pub heartbeat_deadline: Option<Timestamp>,
    pub heartbeat_interval_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zone: Option<ZoneInfo>,
}

/// `game:started_broadcast` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedBroadcast {
    pub player_count: u32,
}

/// `game:ended` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEnded {
    pub winner1: Option<PlayerNumber>,
    pub winner2: Option<PlayerNumber>,
    pub winner3: Option<PlayerNumber>,
    pub top_killer: Option<PlayerNumber>,
}

/// `game:cancelled` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCancelled {
    pub game_id: GameId,
}

/// `checkin:update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinUpdate {
    pub checked_in_count: u32,
    pub total_players: u32,
    pub player_number: PlayerNumber,
}

/// `game:checkin_started` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinStarted {
    pub checkin_duration_seconds: u64,
    pub checkin_ends_at: Timestamp,
}

/// `player:registered` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRegistered {
    pub player_number: PlayerNumber,
    pub player_count: u32,
}

/// `error` and `heartbeat:error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable kebab-case code.
    pub error: String,
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// `error` message with a code.
    pub fn error(code: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorInfo { error: code.into() })
    }

    /// `heartbeat:error` message with a code.
    pub fn heartbeat_error(code: impl Into<String>) -> Self {
        ServerMessage::HeartbeatError(ErrorInfo { error: code.into() })
    }

    /// Wire type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::AuthSuccess(_) => "auth:success",
            ServerMessage::KillRecorded(_) => "kill:recorded",
            ServerMessage::PlayerEliminated(_) => "player:eliminated",
            ServerMessage::TargetAssigned(_) => "target:assigned",
            ServerMessage::HunterUpdated(_) => "hunter:updated",
            ServerMessage::ZoneShrink(_) => "zone:shrink",
            ServerMessage::ZoneWarning(_) => "zone:warning",
            ServerMessage::LeaderboardUpdate(_) => "leaderboard:update",
            ServerMessage::HeartbeatRefreshed(_) => "heartbeat:refreshed",
            ServerMessage::HeartbeatScanSuccess(_) => "heartbeat:scan_success",
            ServerMessage::HeartbeatError(_) => "heartbeat:error",
            ServerMessage::PregameStarted(_) => "game:pregame_started",
            ServerMessage::GameStarted(_) => "game:started",
            ServerMessage::GameStartedBroadcast(_) => "game:started_broadcast",
            ServerMessage::GameEnded(_) => "game:ended",
            ServerMessage::GameCancelled(_) => "game:cancelled",
            ServerMessage::CheckinUpdate(_) => "checkin:update",
            ServerMessage::CheckinStarted(_) => "game:checkin_started",
            ServerMessage::PlayerRegistered(_) => "player:registered",
            ServerMessage::Error(_) => "error",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
