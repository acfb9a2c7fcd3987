//! Network Layer
//!
//! WebSocket gateway for players and spectators. Game rules live in `game/`;
//! this layer authenticates, routes actions to the engine and fans events out.
//!
//! ## Module Structure
//!
//! - `protocol`: Wire messages, both directions
//! - `render`: Game events to wire messages
//! - `hub`: Per-game subscriber fan-out
//! - `auth`: Session token validation
//! - `server`: Accept loop and connection tasks

pub mod auth;
pub mod protocol;
pub mod render;
pub mod hub;
pub mod server;

pub use auth::{authenticate, validate_session, AuthConfig, AuthError, TokenClaims, WalletSession};
pub use protocol::{ClientMessage, Inbound, ServerMessage};
pub use hub::{Hub, Kick, SubscriberId};
pub use server::{GameServer, GameServerError, ServerConfig};
