//! Orchestration Engine
//!
//! Owns the loaded games and wires them to the ledger, storage and the
//! subscriber hub. Every change to a game goes through [`Engine::mutate`]:
//!
//! 1. take the game's write lock and apply the mutation
//! 2. enqueue rendered events to subscribers (non-blocking)
//! 3. collect due ledger intents and activity entries
//! 4. release the lock
//! 5. persist and submit ledger calls
//!
//! No RPC or storage I/O happens while a game lock is held.
//!
//! ## Module Structure
//!
//! - `registry`: Loaded games, one lock each
//! - `reconciler`: Ledger log application, backfill, live stream, rebuild
//! - `actions`: Player actions arriving from the gateway
//! - `driver`: Periodic timer sweep and eviction

pub mod registry;
pub mod reconciler;
pub mod actions;
pub mod driver;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::game::events::{GameEvent, LedgerIntent};
use crate::game::state::{Game, GameError, GameId, Timestamp};
use crate::ledger::client::{LedgerCall, LedgerClient, LedgerError};
use crate::ledger::events::{LedgerCursor, LedgerWinners};
use crate::network::hub::Hub;
use crate::storage::{ActivityEntry, Storage, StoreError};

pub use actions::{ActionError, PlayerSession};
pub use registry::{GameHandle, GameRegistry};

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Ledger unreachable or call rejected.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Storage failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Game rule violation while applying history.
    #[error("game error: {0}")]
    Game(#[from] GameError),

    /// No such game on the ledger.
    #[error("unknown game {0}")]
    UnknownGame(GameId),
}

/// Work collected under a game lock and carried out after release.
struct Followup {
    revision: u64,
    snapshot: Option<Game>,
    activity: Vec<ActivityEntry>,
    calls: Vec<LedgerCall>,
}

/// The orchestration engine.
pub struct Engine {
    config: EngineConfig,
    registry: GameRegistry,
    ledger: LedgerClient,
    storage: Storage,
    hub: Arc<Hub>,
    clock: Arc<dyn Clock>,
    cursor: Mutex<LedgerCursor>,
    revision: AtomicU64,
    saved: Mutex<BTreeMap<GameId, u64>>,
}

impl Engine {
    /// Create an engine with no games loaded.
    pub fn new(
        config: EngineConfig,
        ledger: LedgerClient,
        storage: Storage,
        hub: Arc<Hub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry: GameRegistry::new(),
            ledger,
            storage,
            hub,
            clock,
            cursor: Mutex::new(LedgerCursor::default()),
            revision: AtomicU64::new(0),
            saved: Mutex::new(BTreeMap::new()),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loaded games.
    pub fn registry(&self) -> &GameRegistry {
        &self.registry
    }

    /// Subscriber hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Record storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Current time.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Last ledger log processed.
    pub async fn cursor(&self) -> LedgerCursor {
        *self.cursor.lock().await
    }

    /// Load persisted games and the cursor. Call once at startup.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let cursor = self.storage.load_cursor().await?;
        *self.cursor.lock().await = cursor;

        let games = self.storage.load_games().await?;
        let count = games.len();
        for game in games {
            self.registry.insert(game).await;
        }
        info!(games = count, cursor = cursor.sequence, "Restored games");
        Ok(count)
    }

    /// Persist the cursor.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let cursor = *self.cursor.lock().await;
        self.storage.save_cursor(&cursor).await?;
        info!(sequence = cursor.sequence, key = %cursor.key, "Checkpointed ledger cursor");
        Ok(())
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Apply `f` to a game under its write lock, then fan out the results.
    ///
    /// `f` receives the current time and works on a draft of the game that
    /// replaces it only when `f` succeeds, so a failed mutation leaves
    /// nothing behind. Its events reach subscribers before the lock is
    /// released, so per-game delivery order is mutation order.
    pub async fn mutate<F, E>(&self, handle: &GameHandle, f: F) -> Result<Vec<GameEvent>, E>
    where
        F: FnOnce(&mut Game, Timestamp) -> Result<Vec<GameEvent>, E>,
    {
        let now = self.clock.now();
        let (events, followup) = {
            let mut game = handle.write().await;
            let mut draft = game.clone();
            let events = f(&mut draft, now)?;
            *game = draft;
            self.hub.dispatch(&game, &events);
            let followup = self.collect_followup(&mut game, &events, now);
            (events, followup)
        };
        self.run_followup(followup).await;
        Ok(events)
    }

    fn collect_followup(&self, game: &mut Game, events: &[GameEvent], now: Timestamp) -> Followup {
        let calls: Vec<LedgerCall> = game
            .due_intents(now, self.config.resubmit_secs)
            .into_iter()
            .filter_map(|intent| ledger_call(game, intent))
            .collect();

        let mut activity = Vec::new();
        for event in events.iter().filter(|e| e.is_activity()) {
            activity.push(ActivityEntry {
                game_id: game.id,
                seq: game.next_activity_seq(),
                timestamp: now,
                event: event.clone(),
            });
        }

        Followup {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            snapshot: (!events.is_empty()).then(|| game.clone()),
            activity,
            calls,
        }
    }

    async fn run_followup(&self, followup: Followup) {
        if let Some(game) = followup.snapshot {
            self.persist(&game, followup.revision).await;
        }
        for entry in &followup.activity {
            if let Err(e) = self.storage.append_activity(entry).await {
                error!(game_id = entry.game_id, seq = entry.seq, error = %e, "Failed to append activity");
            }
        }
        for call in followup.calls {
            self.spawn_submit(call);
        }
    }

    /// Write a snapshot unless a newer one was already written.
    async fn persist(&self, game: &Game, revision: u64) {
        let mut saved = self.saved.lock().await;
        if saved.get(&game.id).is_some_and(|&last| last >= revision) {
            debug!(game_id = game.id, revision, "Skipping stale snapshot");
            return;
        }
        match self.storage.save_game(game).await {
            Ok(()) => {
                saved.insert(game.id, revision);
            }
            Err(e) => error!(game_id = game.id, error = %e, "Failed to persist game"),
        }
    }

    /// Persist a game outside of any mutation, e.g. after a rebuild.
    pub(crate) async fn persist_now(&self, game: &Game) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.persist(game, revision).await;
    }

    fn spawn_submit(&self, call: LedgerCall) {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            let method = call.method();
            match ledger.submit(call).await {
                Ok(receipt) => info!(method, block = receipt.block, "Ledger call mined"),
                Err(e) => warn!(method, error = %e, "Ledger call failed; will resubmit"),
            }
        });
    }
}

/// Contract call for a game's intent.
fn ledger_call(game: &Game, intent: LedgerIntent) -> Option<LedgerCall> {
    let game_id = game.id;
    let call = match intent {
        LedgerIntent::StartGame => LedgerCall::StartGame { game_id },
        LedgerIntent::TriggerCancellation => LedgerCall::TriggerCancellation { game_id },
        LedgerIntent::TriggerExpiry => LedgerCall::TriggerExpiry { game_id },
        LedgerIntent::EliminatePlayer { player, reason } => LedgerCall::EliminatePlayer {
            game_id,
            player: game.player(player)?.address,
            reason,
        },
        LedgerIntent::EndGame { winners } => LedgerCall::EndGame {
            game_id,
            winners: LedgerWinners::from_numbers(game, &winners),
        },
    };
    Some(call)
}

// =============================================================================
// TEST HARNESS
// =============================================================================

#[cfg(test)]
pub(crate) mod harness {
    use super::*;
    use std::time::Duration;

    use crate::core::clock::ManualClock;
    use crate::game::state::fixtures::{addr, config};
    use crate::game::state::GameConfig;
    use crate::ledger::client::{ChainRpc, RetryPolicy};
    use crate::ledger::memory::MemoryChain;
    use crate::storage::MemoryStore;

    /// Engine over an in-process chain and store, with a manual clock.
    pub struct Harness {
        pub engine: Arc<Engine>,
        pub chain: Arc<MemoryChain>,
        pub clock: Arc<ManualClock>,
        pub storage: Storage,
    }

    pub fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    impl Harness {
        pub fn new() -> Self {
            let chain = Arc::new(MemoryChain::new(addr(250), 100));
            Self::with_chain(chain, Storage::new(Arc::new(MemoryStore::new())))
        }

        pub fn with_chain(chain: Arc<MemoryChain>, storage: Storage) -> Self {
            let clock = Arc::new(ManualClock::new(100));
            let config = EngineConfig {
                retry: fast_retry(),
                backfill_batch: 4,
                operator: chain.operator(),
                ..EngineConfig::default()
            };
            let ledger = LedgerClient::new(chain.clone() as Arc<dyn ChainRpc>, fast_retry());
            let engine = Arc::new(Engine::new(
                config,
                ledger,
                storage.clone(),
                Arc::new(Hub::new()),
                clock.clone() as Arc<dyn Clock>,
            ));
            Self { engine, chain, clock, storage }
        }

        /// Move chain and engine time together.
        pub fn set_time(&self, now: Timestamp) {
            self.clock.set(now);
            self.chain.set_time(now);
        }

        /// Create a game and register `players` (addresses 1..=players).
        pub fn create_game(&self, cfg: GameConfig, players: u8) -> GameId {
            let receipt = self.chain.execute(LedgerCall::CreateGame { config: cfg.clone() }).unwrap();
            let game_id = receipt.value as GameId;
            for i in 1..=players {
                self.chain
                    .execute(LedgerCall::Register { game_id, player: addr(i), value: cfg.entry_fee })
                    .unwrap();
            }
            game_id
        }

        /// Default game: min 2, max 16.
        pub fn default_game(&self, players: u8) -> GameId {
            self.create_game(config(2, 16), players)
        }
    }
}
