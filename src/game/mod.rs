//! Game Logic Module
//!
//! Per-game rules. Pure and synchronous: every mutation takes the current
//! time explicitly and returns the events it caused.
//!
//! ## Module Structure
//!
//! - `state`: Game and player records, eliminations, winners
//! - `events`: Facts produced by mutations and ledger intents
//! - `phase`: Lifecycle state machine and check-in
//! - `ring`: Hunter -> target cycle and kill adjudication
//! - `zone`: Shrinking geofence
//! - `heartbeat`: Liveness deadlines

pub mod state;
pub mod events;
pub mod phase;
pub mod ring;
pub mod zone;
pub mod heartbeat;

// Re-export key types
pub use state::{
    Address, Game, GameConfig, GameError, GameId, Phase, Player, PlayerNumber,
    EliminationReason, Timestamp, Winners,
};
pub use events::{Audience, GameEvent, LedgerIntent};
pub use phase::{CheckinError, GameRules};
pub use ring::KillRejection;
pub use zone::ZoneState;
pub use heartbeat::HeartbeatError;
