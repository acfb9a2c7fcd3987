//! Game Registry
//!
//! Loaded games, each behind its own lock. Games never share a lock, so a
//! slow mutation in one cannot stall another.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::game::state::{Game, GameId};

/// Shared handle to one game.
pub type GameHandle = Arc<RwLock<Game>>;

/// Map of loaded games.
#[derive(Default)]
pub struct GameRegistry {
    games: RwLock<BTreeMap<GameId, GameHandle>>,
}

impl GameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a game if loaded.
    pub async fn get(&self, id: GameId) -> Option<GameHandle> {
        self.games.read().await.get(&id).cloned()
    }

    /// Load or replace a game, returning its handle.
    pub async fn insert(&self, game: Game) -> GameHandle {
        let id = game.id;
        let handle = Arc::new(RwLock::new(game));
        self.games.write().await.insert(id, handle.clone());
        handle
    }

    /// Replace the contents of a loaded game in place, or load it.
    ///
    /// Existing handles stay valid, so connections holding one see the
    /// rebuilt state.
    pub async fn replace(&self, game: Game) -> GameHandle {
        if let Some(handle) = self.get(game.id).await {
            *handle.write().await = game;
            return handle;
        }
        self.insert(game).await
    }

    /// Unload a game.
    pub async fn remove(&self, id: GameId) -> Option<GameHandle> {
        self.games.write().await.remove(&id)
    }

    /// Ids of loaded games, ascending.
    pub async fn ids(&self) -> Vec<GameId> {
        self.games.read().await.keys().copied().collect()
    }

    /// Number of loaded games.
    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    /// Whether no game is loaded.
    pub async fn is_empty(&self) -> bool {
        self.games.read().await.is_empty()
    }
}
