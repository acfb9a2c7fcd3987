//! State Hashing for Verification
//!
//! Provides deterministic hashing of game state for:
//! - Comparing live state against a rebuild from ledger history
//! - Detecting drift between a persisted snapshot and the ledger
//! - Logging compact state fingerprints

use sha2::{Sha256, Digest};
use super::geo::GeoPoint;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for game state.
///
/// Wraps SHA-256 with helpers for the integer types game records use.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for game state.
    pub fn for_game_state() -> Self {
        Self::new(b"CHAIN_ASSASSIN_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u128 value (little-endian).
    #[inline]
    pub fn update_u128(&mut self, value: u128) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional u32, tagging presence.
    #[inline]
    pub fn update_opt_u32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u32(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Update with an optional u64, tagging presence.
    #[inline]
    pub fn update_opt_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u64(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Update with a coordinate.
    #[inline]
    pub fn update_point(&mut self, point: GeoPoint) {
        self.hasher.update(point.lat_e6.to_le_bytes());
        self.hasher.update(point.lon_e6.to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute state hash for a game.
///
/// Called by `Game::compute_hash()`; the closure adds game-specific data.
pub fn compute_state_hash<F>(game_id: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();
    hasher.update_u64(game_id);
    add_state(&mut hasher);
    hasher.finalize()
}

// =============================================================================
// TESTS
// =============================================================================
