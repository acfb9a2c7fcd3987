//! Core deterministic primitives.
//!
//! Everything here except the clock is pure and platform independent, so that a game rebuilt
//! from ledger history is bit-for-bit the game that ran live.

pub mod geo;
pub mod rng;
pub mod hash;
pub mod clock;

// Re-export core types
pub use geo::{GeoPoint, haversine_m, distance_to_edge_m};
pub use rng::DeterministicRng;
pub use hash::{StateHash, compute_state_hash};
pub use clock::{Clock, SystemClock, ManualClock};
