//! # Chain Assassin Game Server
//!
//! Orchestrates live elimination games whose registrations, kills and payouts
//! are anchored on a ledger contract. The server keeps the real-time state
//! the contract cannot: check-ins, the target ring, the shrinking zone and
//! heartbeats. It pushes every change to connected players.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CHAIN ASSASSIN SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── geo.rs      - Micro-degree points, haversine            │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  ├── hash.rs     - State hashing for replay comparison       │
//! │  └── clock.rs    - Wall clock and manual test clock          │
//! │                                                              │
//! │  game/           - Per-game rules (pure, synchronous)        │
//! │  ├── state.rs    - Game and player records                   │
//! │  ├── phase.rs    - Lifecycle and check-in                    │
//! │  ├── ring.rs     - Target ring and kill adjudication         │
//! │  ├── zone.rs     - Shrinking geofence                        │
//! │  └── heartbeat.rs- Liveness deadlines                        │
//! │                                                              │
//! │  ledger/         - Contract client and in-process chain      │
//! │  storage/        - Keyed records, memory and file backends   │
//! │                                                              │
//! │  engine/         - Orchestration                             │
//! │  ├── reconciler  - Backfill, live stream, rebuild            │
//! │  ├── actions     - Player requests                           │
//! │  └── driver      - Timer sweep and eviction                  │
//! │                                                              │
//! │  network/        - WebSocket gateway                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replay Guarantee
//!
//! `core/` and `game/` are deterministic: BTreeMap everywhere, integer
//! coordinates, seeded ring order, explicit timestamps. Replaying a game's
//! ledger history always yields the same state hash as processing it live.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod ledger;
pub mod storage;
pub mod engine;
pub mod network;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, EngineConfig, StoreConfig};
pub use core::{Clock, GeoPoint, SystemClock};
pub use engine::{Engine, EngineError};
pub use game::{Address, Game, GameId, Phase, PlayerNumber, Timestamp};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
