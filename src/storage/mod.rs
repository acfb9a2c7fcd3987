//! Storage Module
//!
//! Durable keyed records: games, players, the ledger cursor and the activity
//! log. Backends implement the byte-level [`Store`] trait; [`Storage`] adds
//! typed access with `bincode` encoding.
//!
//! ## Keys
//!
//! ```text
//! game/{game_id:020}
//! player/{game_id:020}/{player_number:010}
//! activity/{game_id:020}/{seq:020}
//! cursor
//! ```
//!
//! Numbers are zero-padded so prefix scans come back in numeric order.

pub mod activity;
pub mod memory;
pub mod file;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};

use crate::game::state::{Game, GameId, Player, PlayerNumber};
use crate::ledger::events::LedgerCursor;

pub use activity::ActivityEntry;
pub use memory::MemoryStore;
pub use file::FileStore;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Key contains characters the backend cannot store.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Byte-level keyed store.
pub trait Store: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>>;

    /// Write a value, replacing any previous one.
    fn put(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Remove a value; removing a missing key is not an error.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), StoreError>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<(String, Vec<u8>)>, StoreError>>;
}

/// Key validity shared by backends: lowercase alphanumerics, `_`, `-`, `/`.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && key.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'/'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

// =============================================================================
// KEYS
// =============================================================================

const CURSOR_KEY: &str = "cursor";

fn game_key(id: GameId) -> String {
    format!("game/{id:020}")
}

fn player_prefix(game_id: GameId) -> String {
    format!("player/{game_id:020}/")
}

fn player_key(game_id: GameId, number: PlayerNumber) -> String {
    format!("player/{game_id:020}/{number:010}")
}

fn activity_prefix(game_id: GameId) -> String {
    format!("activity/{game_id:020}/")
}

fn activity_key(game_id: GameId, seq: u64) -> String {
    format!("activity/{game_id:020}/{seq:020}")
}

// =============================================================================
// TYPED ACCESS
// =============================================================================

/// Typed records over a [`Store`].
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn Store>,
}

impl Storage {
    /// Wrap a backend.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn put_record<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        self.store.put(key, bytes).await
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn scan_records<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.store
            .scan_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(StoreError::from))
            .collect()
    }

    /// Persist a game snapshot and its player records.
    pub async fn save_game(&self, game: &Game) -> Result<(), StoreError> {
        self.store.put(&game_key(game.id), game.snapshot_bytes()?).await?;
        for player in game.players.values() {
            self.save_player(game.id, player).await?;
        }
        Ok(())
    }

    /// Persist one player record.
    pub async fn save_player(&self, game_id: GameId, player: &Player) -> Result<(), StoreError> {
        self.put_record(&player_key(game_id, player.number), player).await
    }

    /// Load a game snapshot.
    pub async fn load_game(&self, id: GameId) -> Result<Option<Game>, StoreError> {
        match self.store.get(&game_key(id)).await? {
            Some(bytes) => Ok(Some(Game::from_snapshot(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load every stored game.
    pub async fn load_games(&self) -> Result<Vec<Game>, StoreError> {
        self.store
            .scan_prefix("game/")
            .await?
            .into_iter()
            .map(|(_, bytes)| Game::from_snapshot(&bytes).map_err(StoreError::from))
            .collect()
    }

    /// Stored player records of a game.
    pub async fn load_players(&self, game_id: GameId) -> Result<BTreeMap<PlayerNumber, Player>, StoreError> {
        let players: Vec<Player> = self.scan_records(&player_prefix(game_id)).await?;
        Ok(players.into_iter().map(|p| (p.number, p)).collect())
    }

    /// Drop every game, player and activity record. The cursor is kept.
    ///
    /// Returns the number of records removed.
    pub async fn purge_games(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for prefix in ["game/", "player/", "activity/"] {
            for (key, _) in self.store.scan_prefix(prefix).await? {
                self.store.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Persist the reconciliation cursor.
    pub async fn save_cursor(&self, cursor: &LedgerCursor) -> Result<(), StoreError> {
        self.put_record(CURSOR_KEY, cursor).await
    }

    /// Load the reconciliation cursor, default if never saved.
    pub async fn load_cursor(&self) -> Result<LedgerCursor, StoreError> {
        Ok(self.get_record(CURSOR_KEY).await?.unwrap_or_default())
    }

    /// Append an activity-log entry.
    pub async fn append_activity(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        self.put_record(&activity_key(entry.game_id, entry.seq), entry).await
    }

    /// Activity log of a game, oldest first.
    pub async fn activity(&self, game_id: GameId) -> Result<Vec<ActivityEntry>, StoreError> {
        self.scan_records(&activity_prefix(game_id)).await
    }
}
