//! Event Reconciler
//!
//! Keeps loaded games in step with the ledger. Three entry points share one
//! application function:
//!
//! - **backfill**: page through logs after the cursor
//! - **live**: follow the notification stream; a gap or lag falls back to backfill
//! - **rebuild**: replay a game's (or every game's) full history
//!
//! Application is idempotent per event key, and time windows are advanced to
//! each log's block timestamp before the log is applied, so a game rebuilt
//! from history matches the game that followed the stream live.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, instrument, warn};

use crate::engine::{Engine, EngineError};
use crate::game::events::GameEvent;
use crate::game::phase::GameRules;
use crate::game::state::{Game, GameError, GameId, Phase, Player, PlayerNumber};
use crate::ledger::client::{OnChainGameState, OnChainPhase};
use crate::ledger::events::{LedgerCursor, LedgerEvent, LedgerLog};

/// Check-ins known per game. They never reach the ledger.
pub type CheckinOverlay = BTreeMap<GameId, BTreeSet<PlayerNumber>>;

// =============================================================================
// PURE APPLICATION
// =============================================================================

/// Apply one ledger log to its game.
///
/// Logs at or before the game's last applied key are ignored. `GameCreated`
/// is handled by the caller, since it creates the game.
pub fn apply_event(game: &mut Game, log: &LedgerLog, rules: &GameRules) -> Result<Vec<GameEvent>, GameError> {
    if game.last_applied.is_some_and(|applied| log.key <= applied) {
        debug!(game_id = game.id, key = %log.key, "Skipping applied log");
        return Ok(Vec::new());
    }
    if game.phase.is_terminal() {
        warn!(game_id = game.id, key = %log.key, event = log.event.name(), "Log for finished game ignored");
        game.last_applied = Some(log.key);
        return Ok(Vec::new());
    }

    let at = log.timestamp;
    let mut events = game.advance_windows(at, rules)?;

    match &log.event {
        LedgerEvent::GameCreated { .. } => {}
        LedgerEvent::PlayerRegistered { player, player_number, .. } => {
            events.extend(game.register_player(*player)?);
            if game.number_of(player) != Some(*player_number) {
                warn!(
                    game_id = game.id,
                    ledger_number = player_number,
                    local_number = ?game.number_of(player),
                    "Player number differs from ledger"
                );
            }
        }
        LedgerEvent::GameStarted { .. } => {
            events.extend(game.start(at, rules)?);
        }
        LedgerEvent::PlayerEliminated { player, eliminator, reason, .. } => {
            let number = game.number_of(player).ok_or(GameError::UnknownAddress(*player))?;
            let eliminator = eliminator.and_then(|a| game.number_of(&a));
            events.extend(game.eliminate(number, *reason, eliminator, at, true)?);
        }
        LedgerEvent::KillRecorded { hunter, target, .. } => {
            let hunter = game.number_of(hunter).ok_or(GameError::UnknownAddress(*hunter))?;
            let target = game.number_of(target).ok_or(GameError::UnknownAddress(*target))?;
            events.extend(game.record_kill(hunter, target, at)?);
        }
        LedgerEvent::GameEnded { winners, .. } => {
            let winners = winners.to_numbers(game);
            events.extend(game.end(winners, at)?);
        }
        LedgerEvent::GameCancelled { .. } => {
            events.extend(game.cancel(at)?);
        }
    }

    game.last_applied = Some(log.key);
    Ok(events)
}

/// Game created by a `GameCreated` log.
pub fn create_game(log: &LedgerLog) -> Option<Game> {
    match &log.event {
        LedgerEvent::GameCreated { game_id, config } => {
            let mut game = Game::new(*game_id, config.clone());
            game.last_applied = Some(log.key);
            Some(game)
        }
        _ => None,
    }
}

/// Mark overlay players as checked in.
fn apply_checkins(game: &mut Game, checked_in: Option<&BTreeSet<PlayerNumber>>) {
    if game.phase != Phase::Checkin {
        return;
    }
    for number in checked_in.into_iter().flatten() {
        if let Some(player) = game.players.get_mut(number).filter(|p| p.alive) {
            player.checked_in = true;
        }
    }
}

/// Rebuild games from history.
///
/// Check-ins from `overlay` are applied right after each game's
/// `GameStarted`. Logs that fail to apply are skipped with a warning.
pub fn replay_logs(logs: &[LedgerLog], rules: &GameRules, overlay: &CheckinOverlay) -> BTreeMap<GameId, Game> {
    let mut games: BTreeMap<GameId, Game> = BTreeMap::new();
    for log in logs {
        let game_id = log.event.game_id();
        if let Some(game) = create_game(log) {
            games.entry(game_id).or_insert(game);
            continue;
        }
        let Some(game) = games.get_mut(&game_id) else {
            warn!(game_id, key = %log.key, "History references a game created before it");
            continue;
        };
        match apply_event(game, log, rules) {
            Ok(_) => {
                if matches!(log.event, LedgerEvent::GameStarted { .. }) {
                    apply_checkins(game, overlay.get(&game_id));
                }
            }
            Err(e) => {
                warn!(game_id, key = %log.key, error = %e, "Skipping inconsistent log during replay");
                game.last_applied = Some(log.key);
            }
        }
    }
    games
}

/// Carry off-chain telemetry over to a rebuilt game.
///
/// Heartbeats and locations are not on the ledger; without this every alive
/// player would look silent after a rebuild.
pub fn merge_telemetry(game: &mut Game, known: &BTreeMap<PlayerNumber, Player>) {
    let hunting = game.phase == Phase::Hunting;
    for player in game.players.values_mut().filter(|p| p.alive) {
        let Some(previous) = known.get(&player.number).filter(|k| k.address == player.address) else {
            continue;
        };
        player.last_location = previous.last_location;
        if hunting {
            player.last_heartbeat_at = previous.last_heartbeat_at;
            player.heartbeat_deadline = player.heartbeat_deadline.max(previous.heartbeat_deadline);
            player.outside_zone_since = previous.outside_zone_since;
        }
    }
    game.rebuild_indexes();
}

/// Whether the contract has moved past a loaded game.
///
/// Only ledger-first facts count: phase, registrations and eliminations the
/// local game has not seen. A local elimination or ending that is still
/// being submitted is not drift.
pub fn lags_ledger(game: &Game, chain: &OnChainGameState) -> bool {
    let local_rank = match game.phase {
        Phase::Registration => 0,
        Phase::Checkin | Phase::Pregame | Phase::Hunting => 1,
        Phase::Ended | Phase::Cancelled => 2,
    };
    let chain_rank = match chain.phase {
        OnChainPhase::Registration => 0,
        OnChainPhase::Active => 1,
        OnChainPhase::Ended | OnChainPhase::Cancelled => 2,
    };
    chain_rank > local_rank || chain.player_count != game.player_count() || chain.alive_count < game.alive_count
}

// =============================================================================
// ENGINE ENTRY POINTS
// =============================================================================

impl Engine {
    /// Apply one log, creating or rebuilding its game as needed.
    ///
    /// Does not move the cursor.
    pub async fn apply_log(&self, log: &LedgerLog) -> Result<(), EngineError> {
        let game_id = log.event.game_id();

        if let Some(game) = create_game(log) {
            if self.registry.get(game_id).await.is_none() {
                info!(game_id, title = %game.config().title, "Game created");
                self.persist_now(&game).await;
                self.registry.insert(game).await;
            }
            return Ok(());
        }

        let Some(handle) = self.registry.get(game_id).await else {
            warn!(game_id, event = log.event.name(), key = %log.key, "Log for unknown game");
            return self.rebuild_game(game_id).await;
        };

        let rules = self.config.rules;
        if let Err(e) = self.mutate(&handle, |game, _| apply_event(game, log, &rules)).await {
            warn!(game_id, key = %log.key, error = %e, "Inconsistent log");
            self.rebuild_game(game_id).await?;
        }
        Ok(())
    }

    /// Apply every log after the cursor, page by page.
    ///
    /// The cursor is saved after each page. A ledger whose head is behind
    /// the cursor has been reset; local games then describe a history that
    /// no longer exists, so they are discarded and replayed from genesis.
    #[instrument(skip(self))]
    pub async fn backfill(&self) -> Result<usize, EngineError> {
        let mut cursor = self.cursor.lock().await;
        let head = self.ledger.head().await?;
        if head.sequence < cursor.sequence {
            warn!(cursor = cursor.sequence, head = head.sequence, "Ledger is behind the saved cursor");
            return self.reset_to_ledger(&mut cursor).await;
        }

        let batch = self.config.backfill_batch;
        let mut applied = 0;

        loop {
            let page = self.ledger.logs_since(cursor.sequence, batch).await?;
            let full = page.len() >= batch;
            if page.is_empty() {
                break;
            }
            for log in page.iter() {
                if cursor.covers(log) {
                    continue;
                }
                self.apply_log(log).await?;
                *cursor = LedgerCursor::at(log);
                applied += 1;
            }
            self.storage.save_cursor(&cursor).await?;
            if !full {
                break;
            }
        }

        if applied > 0 {
            info!(applied, sequence = cursor.sequence, "Backfill complete");
        }
        Ok(applied)
    }

    async fn apply_live(&self, log: &LedgerLog) -> Result<(), EngineError> {
        let mut cursor = self.cursor.lock().await;
        if cursor.covers(log) {
            debug!(sequence = log.sequence, "Already applied");
            return Ok(());
        }
        if cursor.has_gap_before(log) {
            info!(expected = cursor.sequence + 1, got = log.sequence, "Gap in live stream");
            drop(cursor);
            self.backfill().await?;
            return Ok(());
        }
        self.apply_log(log).await?;
        *cursor = LedgerCursor::at(log);
        self.storage.save_cursor(&cursor).await?;
        Ok(())
    }

    /// Follow the ledger until shutdown.
    ///
    /// Subscribes before backfilling so nothing is missed in between. Ledger
    /// failures are logged and retried; gameplay keeps running meanwhile.
    #[instrument(skip(self, shutdown))]
    pub async fn run_live(&self, mut shutdown: broadcast::Receiver<()>) {
        let delay = self.config.resubscribe_delay;
        'subscribe: loop {
            let mut stream = self.ledger.subscribe();
            if let Err(e) = self.backfill().await {
                warn!(error = %e, "Backfill failed");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue 'subscribe,
                    _ = shutdown.recv() => break 'subscribe,
                }
            }

            loop {
                tokio::select! {
                    received = stream.recv() => match received {
                        Ok(log) => {
                            if let Err(e) = self.apply_live(&log).await {
                                warn!(sequence = log.sequence, error = %e, "Live apply failed");
                                tokio::time::sleep(delay).await;
                                continue 'subscribe;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            info!(skipped, "Live stream lagged");
                            if let Err(e) = self.backfill().await {
                                warn!(error = %e, "Backfill after lag failed");
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!("Live stream closed; resubscribing");
                            tokio::time::sleep(delay).await;
                            continue 'subscribe;
                        }
                    },
                    _ = shutdown.recv() => break 'subscribe,
                }
            }
        }
        info!("Live reconciler stopped");
    }

    // =========================================================================
    // REBUILD
    // =========================================================================

    /// Rebuild one game, or every game when `game_id` is `None`.
    ///
    /// A full rebuild also resets the cursor to the end of history.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, game_id: Option<GameId>) -> Result<usize, EngineError> {
        match game_id {
            Some(id) => self.rebuild_game(id).await.map(|()| 1),
            None => self.rebuild_all().await,
        }
    }

    /// Replay a single game from its full ledger history.
    pub async fn rebuild_game(&self, game_id: GameId) -> Result<(), EngineError> {
        let logs = self.ledger.game_logs(game_id).await?;
        let known = self.known_players(game_id).await?;
        let overlay = CheckinOverlay::from([(game_id, checked_in(&known))]);

        let mut games = replay_logs(&logs, &self.config.rules, &overlay);
        let game = games.remove(&game_id).ok_or(EngineError::UnknownGame(game_id))?;
        self.install_rebuilt(game, &known).await;
        info!(game_id, logs = logs.len(), "Rebuilt game");
        Ok(())
    }

    /// Compare every running game with its contract state, config and
    /// shrink schedule, and rebuild the ones out of step. Returns the number
    /// rebuilt.
    #[instrument(skip(self))]
    pub async fn verify_loaded(&self) -> Result<usize, EngineError> {
        let mut rebuilt = 0;
        for game_id in self.registry.ids().await {
            let Some(handle) = self.registry.get(game_id).await else {
                continue;
            };
            if handle.read().await.phase.is_terminal() {
                continue;
            }
            let Some(chain) = self.ledger.game_state(game_id).await? else {
                warn!(game_id, "Loaded game missing from ledger");
                continue;
            };
            let config = self.ledger.game_config(game_id).await?;
            let schedule = self.ledger.shrink_schedule(game_id).await?;

            let (behind, config_differs) = {
                let game = handle.read().await;
                let config_differs = config.as_ref() != Some(game.config())
                    || schedule.as_deref() != Some(game.config().shrink_schedule.as_slice());
                (lags_ledger(&game, &chain), config_differs)
            };
            if behind || config_differs {
                warn!(
                    game_id,
                    phase = ?chain.phase,
                    players = chain.player_count,
                    alive = chain.alive_count,
                    config_differs,
                    "Game out of step with ledger"
                );
                self.rebuild_game(game_id).await?;
                rebuilt += 1;
            }
        }
        Ok(rebuilt)
    }

    async fn rebuild_all(&self) -> Result<usize, EngineError> {
        let mut cursor = self.cursor.lock().await;
        let (games, _) = self.replay_history(&mut cursor).await?;
        Ok(games)
    }

    /// Forget every local game and replay the ledger from its first log.
    ///
    /// Returns the number of logs replayed.
    async fn reset_to_ledger(&self, cursor: &mut LedgerCursor) -> Result<usize, EngineError> {
        for game_id in self.registry.ids().await {
            self.registry.remove(game_id).await;
            self.hub.close_game(game_id);
        }
        let purged = self.storage.purge_games().await?;
        *cursor = LedgerCursor::default();
        self.storage.save_cursor(cursor).await?;

        let (games, logs) = self.replay_history(cursor).await?;
        warn!(purged, games, logs, "Local state replaced from reset ledger");
        Ok(logs)
    }

    /// Replay every log, install the games and move the cursor to the end.
    ///
    /// Returns the games installed and the logs replayed.
    async fn replay_history(&self, cursor: &mut LedgerCursor) -> Result<(usize, usize), EngineError> {
        let batch = self.config.backfill_batch;

        let mut logs: Vec<LedgerLog> = Vec::new();
        loop {
            let after = logs.last().map_or(0, |log| log.sequence);
            let page = self.ledger.logs_since(after, batch).await?;
            let done = page.len() < batch;
            logs.extend(page);
            if done {
                break;
            }
        }

        let mut known = BTreeMap::new();
        for log in &logs {
            if let LedgerEvent::GameCreated { game_id, .. } = log.event {
                known.insert(game_id, self.known_players(game_id).await?);
            }
        }
        let overlay: CheckinOverlay = known.iter().map(|(id, players)| (*id, checked_in(players))).collect();

        let games = replay_logs(&logs, &self.config.rules, &overlay);
        let count = games.len();
        for (id, game) in games {
            let players = known.remove(&id).unwrap_or_default();
            self.install_rebuilt(game, &players).await;
        }

        *cursor = logs.last().map(LedgerCursor::at).unwrap_or_default();
        self.storage.save_cursor(cursor).await?;
        info!(games = count, logs = logs.len(), sequence = cursor.sequence, "Rebuilt all games");
        Ok((count, logs.len()))
    }

    /// Latest known player records: loaded game first, then storage.
    async fn known_players(&self, game_id: GameId) -> Result<BTreeMap<PlayerNumber, Player>, EngineError> {
        if let Some(handle) = self.registry.get(game_id).await {
            return Ok(handle.read().await.players.clone());
        }
        Ok(self.storage.load_players(game_id).await?)
    }

    async fn install_rebuilt(&self, mut game: Game, known: &BTreeMap<PlayerNumber, Player>) {
        merge_telemetry(&mut game, known);
        let previous_seq = match self.registry.get(game.id).await {
            Some(handle) => Some(handle.read().await.activity_seq),
            None => self.storage.load_game(game.id).await.ok().flatten().map(|g| g.activity_seq),
        };
        game.activity_seq = game.activity_seq.max(previous_seq.unwrap_or(0));

        self.persist_now(&game).await;
        self.registry.replace(game).await;
    }
}

fn checked_in(players: &BTreeMap<PlayerNumber, Player>) -> BTreeSet<PlayerNumber> {
    players.values().filter(|p| p.checked_in).map(|p| p.number).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::engine::harness::Harness;
    use crate::game::ring::check_single_cycle;
    use crate::game::state::fixtures::{addr, config};
    use crate::game::state::EliminationReason;
    use crate::ledger::client::LedgerCall;
    use crate::ledger::events::EventKey;
    use crate::ledger::memory::MemoryChain;
    use crate::storage::{MemoryStore, Storage};

    async fn all_logs(h: &Harness) -> Vec<LedgerLog> {
        h.engine.ledger.logs_since(0, 10_000).await.unwrap()
    }

    /// Wait until spawned ledger submissions have landed and been applied.
    async fn settle(h: &Harness) {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.engine.backfill().await.unwrap();
            if h.engine.cursor().await.sequence == h.chain.log_count() as u64 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if h.engine.cursor().await.sequence == h.chain.log_count() as u64 {
                    return;
                }
            }
        }
        panic!("ledger did not settle");
    }

    async fn handle_players(h: &Harness, game_id: GameId) -> u32 {
        h.engine.registry().get(game_id).await.unwrap().read().await.player_count()
    }

    fn start_on_chain(h: &Harness, game_id: GameId) {
        h.set_time(2_000);
        h.chain.execute(LedgerCall::StartGame { game_id }).unwrap();
    }

    async fn check_in_all(h: &Harness, game_id: GameId) {
        let handle = h.engine.registry().get(game_id).await.unwrap();
        let numbers: Vec<PlayerNumber> = handle.read().await.players.keys().copied().collect();
        let rules = h.engine.config().rules;
        for n in numbers {
            h.engine
                .mutate(&handle, |game, now| game.check_in(Some(n), None, now, &rules))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_apply_is_idempotent_per_key() {
        let rules = GameRules::default();
        let mut game = Game::new(1, config(2, 8));
        let log = LedgerLog {
            key: EventKey::new(3, 0),
            sequence: 2,
            timestamp: 500,
            event: LedgerEvent::PlayerRegistered { game_id: 1, player: addr(1), player_number: 1 },
        };
        assert_eq!(apply_event(&mut game, &log, &rules).unwrap().len(), 1);
        let hash = game.compute_hash();
        assert!(apply_event(&mut game, &log, &rules).unwrap().is_empty());
        assert_eq!(game.compute_hash(), hash);
        assert_eq!(game.player_count(), 1);
    }

    #[test]
    fn test_windows_advance_to_log_time() {
        let rules = GameRules::default();
        let mut game = crate::game::state::fixtures::game_with_players(1, 3);
        game.start(2_000, &rules).unwrap();
        for n in [1, 2] {
            game.check_in(Some(n), None, 2_010, &rules).unwrap();
        }
        let log = LedgerLog {
            key: EventKey::new(9, 0),
            sequence: 9,
            timestamp: 2_000 + rules.checkin_secs + 1,
            event: LedgerEvent::PlayerEliminated {
                game_id: 1,
                player: addr(3),
                eliminator: None,
                reason: EliminationReason::NoCheckin,
            },
        };
        let events = apply_event(&mut game, &log, &rules).unwrap();
        assert!(events.iter().any(|e| matches!(e, GameEvent::PregameStarted { .. })));
        assert_eq!(game.phase, Phase::Pregame);
        let elimination = game.player(3).unwrap().elimination.unwrap();
        assert!(elimination.confirmed);
        assert_eq!(elimination.at, log.timestamp);
    }

    #[tokio::test]
    async fn test_backfill_creates_games_and_saves_cursor() {
        let h = Harness::new();
        let game_id = h.default_game(5);
        let applied = h.engine.backfill().await.unwrap();
        assert_eq!(applied, 6);

        let handle = h.engine.registry().get(game_id).await.unwrap();
        assert_eq!(handle.read().await.player_count(), 5);
        assert_eq!(h.storage.load_cursor().await.unwrap().sequence, 6);
        assert_eq!(h.engine.backfill().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_game_triggers_scoped_rebuild() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        // Pretend GameCreated was processed but its game was lost
        h.storage.save_cursor(&LedgerCursor { key: EventKey::new(1, 0), sequence: 1 }).await.unwrap();
        h.engine.restore().await.unwrap();

        h.engine.backfill().await.unwrap();
        let handle = h.engine.registry().get(game_id).await.unwrap();
        let game = handle.read().await;
        assert_eq!(game.player_count(), 3);
        assert_eq!(game.last_applied, Some(EventKey::new(4, 0)));
    }

    #[tokio::test]
    async fn test_reset_ledger_replaces_stale_games() {
        let storage = Storage::new(Arc::new(MemoryStore::new()));
        let first = Harness::with_chain(Arc::new(MemoryChain::new(addr(250), 100)), storage.clone());
        let old_id = first.default_game(5);
        first.engine.backfill().await.unwrap();
        assert_eq!(storage.load_cursor().await.unwrap().sequence, 6);

        // Restart against a fresh ledger whose history is shorter than the cursor
        let second = Harness::with_chain(Arc::new(MemoryChain::new(addr(250), 100)), storage.clone());
        assert_eq!(second.engine.restore().await.unwrap(), 1);
        let game_id = second.default_game(2);
        assert_eq!(game_id, old_id);

        assert_eq!(second.engine.backfill().await.unwrap(), 3);
        let handle = second.engine.registry().get(game_id).await.unwrap();
        assert_eq!(handle.read().await.player_count(), 2);
        assert_eq!(second.engine.cursor().await.sequence, 3);
        assert_eq!(storage.load_cursor().await.unwrap().sequence, 3);
        assert_eq!(storage.load_players(game_id).await.unwrap().len(), 2);

        second.chain.execute(LedgerCall::Register { game_id, player: addr(3), value: 1_000 }).unwrap();
        assert_eq!(second.engine.backfill().await.unwrap(), 1);
        assert_eq!(handle_players(&second, game_id).await, 3);
    }

    #[tokio::test]
    async fn test_cursor_ahead_of_empty_ledger_resets() {
        let h = Harness::new();
        h.storage.save_cursor(&LedgerCursor { key: EventKey::new(10, 0), sequence: 10 }).await.unwrap();
        h.engine.restore().await.unwrap();

        assert_eq!(h.engine.backfill().await.unwrap(), 0);
        assert_eq!(h.engine.cursor().await, LedgerCursor::default());

        let game_id = h.default_game(3);
        assert_eq!(h.engine.backfill().await.unwrap(), 4);
        assert_eq!(handle_players(&h, game_id).await, 3);
    }

    #[tokio::test]
    async fn test_inconsistent_log_leaves_state_and_storage_in_step() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        h.engine.backfill().await.unwrap();
        start_on_chain(&h, game_id);
        h.engine.backfill().await.unwrap();
        let rules = h.engine.config().rules;
        let cursor = h.engine.cursor().await;

        // Past the check-in deadline, so applying it would first close check-in
        let log = LedgerLog {
            key: EventKey::new(cursor.key.block + 1, 0),
            sequence: cursor.sequence + 1,
            timestamp: 2_000 + rules.checkin_secs + 1,
            event: LedgerEvent::KillRecorded { game_id, hunter: addr(1), target: addr(42) },
        };
        h.engine.apply_log(&log).await.unwrap();

        let handle = h.engine.registry().get(game_id).await.unwrap();
        let game = handle.read().await;
        assert_eq!(game.phase, Phase::Checkin);
        assert_eq!(game.alive_count, 3);
        let stored = h.storage.load_game(game_id).await.unwrap().unwrap();
        assert_eq!(stored.compute_hash(), game.compute_hash());
        let activity = h.storage.activity(game_id).await.unwrap();
        assert!(activity.iter().all(|e| !matches!(e.event, GameEvent::PlayerEliminated { .. })));
    }

    #[tokio::test]
    async fn test_live_gap_triggers_backfill() {
        let h = Harness::new();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let engine = h.engine.clone();
        let live = tokio::spawn(async move { engine.run_live(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let game_id = h.default_game(0);
        h.chain.suppress_broadcast(1);
        h.chain.execute(LedgerCall::Register { game_id, player: addr(1), value: 1_000 }).unwrap();
        h.chain.execute(LedgerCall::Register { game_id, player: addr(2), value: 1_000 }).unwrap();

        for _ in 0..100 {
            if h.engine.cursor().await.sequence == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.engine.cursor().await.sequence, 3);
        let handle = h.engine.registry().get(game_id).await.unwrap();
        assert_eq!(handle.read().await.player_count(), 2);

        shutdown_tx.send(()).unwrap();
        live.await.unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_twice_is_byte_identical() {
        let h = Harness::new();
        let game_id = h.default_game(4);
        h.engine.backfill().await.unwrap();
        start_on_chain(&h, game_id);
        h.engine.backfill().await.unwrap();
        check_in_all(&h, game_id).await;

        h.engine.rebuild(Some(game_id)).await.unwrap();
        let first = h.engine.registry().get(game_id).await.unwrap().read().await.snapshot_bytes().unwrap();
        h.engine.rebuild(Some(game_id)).await.unwrap();
        let second = h.engine.registry().get(game_id).await.unwrap().read().await.snapshot_bytes().unwrap();
        assert_eq!(first, second);

        let logs = all_logs(&h).await;
        let overlay = CheckinOverlay::from([(game_id, BTreeSet::from([1, 2, 3, 4]))]);
        let a = replay_logs(&logs, &GameRules::default(), &overlay);
        let b = replay_logs(&logs, &GameRules::default(), &overlay);
        assert_eq!(a[&game_id].snapshot_bytes().unwrap(), b[&game_id].snapshot_bytes().unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_checkins_and_activity_seq() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        h.engine.backfill().await.unwrap();
        start_on_chain(&h, game_id);
        h.engine.backfill().await.unwrap();
        check_in_all(&h, game_id).await;
        let seq_before = h.engine.registry().get(game_id).await.unwrap().read().await.activity_seq;

        assert_eq!(h.engine.rebuild(None).await.unwrap(), 1);
        let handle = h.engine.registry().get(game_id).await.unwrap();
        let game = handle.read().await;
        assert_eq!(game.checked_in_count(), 3);
        assert_eq!(game.activity_seq, seq_before);
        assert_eq!(h.engine.cursor().await.sequence, h.chain.log_count() as u64);
    }

    #[tokio::test]
    async fn test_backfill_and_live_match_full_rebuild() {
        let h = Harness::new();
        let game_id = h.create_game(config(4, 8), 5);
        h.engine.backfill().await.unwrap();
        start_on_chain(&h, game_id);
        h.engine.backfill().await.unwrap();

        let handle = h.engine.registry().get(game_id).await.unwrap();
        let rules = h.engine.config().rules;
        for n in 1..=4 {
            h.engine.mutate(&handle, |g, now| g.check_in(Some(n), None, now, &rules)).await.unwrap();
        }

        // Close check-in and pregame; the no-checkin elimination goes to the ledger
        h.set_time(2_000 + rules.checkin_secs + rules.pregame_secs + 1);
        h.engine.mutate(&handle, |g, now| g.tick(now, &rules)).await.unwrap();
        settle(&h).await;

        let live = handle.read().await.clone();
        assert_eq!(live.phase, Phase::Hunting);
        assert_eq!(live.alive_count, 4);
        assert!(live.player(5).unwrap().elimination.unwrap().confirmed);

        let overlay = CheckinOverlay::from([(game_id, BTreeSet::from([1, 2, 3, 4]))]);
        let rebuilt = replay_logs(&all_logs(&h).await, &rules, &overlay);
        assert_eq!(rebuilt[&game_id].compute_hash(), live.compute_hash());
        assert!(check_single_cycle(&rebuilt[&game_id].players).is_ok());
    }

    #[tokio::test]
    async fn test_random_kill_sequence_reconciles() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let h = Harness::new();
        let game_id = h.default_game(8);
        h.engine.backfill().await.unwrap();
        start_on_chain(&h, game_id);
        h.engine.backfill().await.unwrap();
        check_in_all(&h, game_id).await;

        let rules = h.engine.config().rules;
        h.set_time(2_000 + rules.checkin_secs + rules.pregame_secs);
        let handle = h.engine.registry().get(game_id).await.unwrap();
        h.engine.mutate(&handle, |g, now| g.tick(now, &rules)).await.unwrap();
        assert_eq!(handle.read().await.phase, Phase::Hunting);

        let mut now = h.engine.now();
        loop {
            let (hunter, target) = {
                let game = handle.read().await;
                if game.alive_count <= 1 {
                    break;
                }
                let alive = game.alive_numbers();
                let hunter = alive[rng.gen_range(0..alive.len())];
                (game.player(hunter).unwrap().address, game.player(hunter).unwrap().target.unwrap())
            };
            let target = handle.read().await.player(target).unwrap().address;
            now += rng.gen_range(1..30);
            h.set_time(now);
            h.chain.execute(LedgerCall::RecordKill { game_id, hunter, target }).unwrap();
            h.engine.backfill().await.unwrap();

            let game = handle.read().await;
            if game.phase == Phase::Hunting && game.alive_count > 1 {
                assert!(check_single_cycle(&game.players).is_ok());
            }
        }
        settle(&h).await;

        let live = handle.read().await.clone();
        assert_eq!(live.phase, Phase::Ended);
        let winners = live.winners.unwrap();
        assert_eq!(winners.first, live.alive_numbers().first().copied());
        assert_eq!(live.players.values().map(|p| p.kills).sum::<u32>(), 7);

        let overlay = CheckinOverlay::from([(game_id, (1..=8).collect())]);
        let rebuilt = replay_logs(&all_logs(&h).await, &rules, &overlay);
        assert_eq!(rebuilt[&game_id].compute_hash(), live.compute_hash());
    }

    #[test]
    fn test_lags_ledger_only_on_ledger_first_facts() {
        let game = crate::game::state::fixtures::game_with_players(5, 3);
        let chain = |phase, player_count, alive_count| OnChainGameState {
            phase,
            player_count,
            alive_count,
            total_collected: 0,
            winners: None,
        };
        assert!(!lags_ledger(&game, &chain(OnChainPhase::Registration, 3, 3)));
        assert!(lags_ledger(&game, &chain(OnChainPhase::Registration, 4, 4)));
        assert!(lags_ledger(&game, &chain(OnChainPhase::Active, 3, 3)));
        assert!(lags_ledger(&game, &chain(OnChainPhase::Cancelled, 3, 3)));

        let mut ended = game.clone();
        ended.phase = Phase::Ended;
        assert!(!lags_ledger(&ended, &chain(OnChainPhase::Active, 3, 3)));
    }

    #[tokio::test]
    async fn test_verify_loaded_rebuilds_stale_game() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        h.engine.backfill().await.unwrap();
        assert_eq!(h.engine.verify_loaded().await.unwrap(), 0);

        let created = all_logs(&h).await.into_iter().next().unwrap();
        h.engine.registry().replace(create_game(&created).unwrap()).await;
        assert_eq!(handle_players(&h, game_id).await, 0);

        assert_eq!(h.engine.verify_loaded().await.unwrap(), 1);
        assert_eq!(handle_players(&h, game_id).await, 3);
        assert_eq!(h.engine.verify_loaded().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_loaded_rebuilds_on_config_mismatch() {
        let h = Harness::new();
        let game_id = h.default_game(2);
        h.engine.backfill().await.unwrap();

        let mut created = all_logs(&h).await.into_iter().next().unwrap();
        if let LedgerEvent::GameCreated { config, .. } = &mut created.event {
            config.shrink_schedule[0].radius_m += 1;
        }
        let mut tampered = create_game(&created).unwrap();
        for i in 1..=2 {
            tampered.register_player(addr(i)).unwrap();
        }
        h.engine.registry().replace(tampered).await;

        assert_eq!(h.engine.verify_loaded().await.unwrap(), 1);
        let chain_schedule = h.engine.ledger.shrink_schedule(game_id).await.unwrap().unwrap();
        let handle = h.engine.registry().get(game_id).await.unwrap();
        assert_eq!(handle.read().await.config().shrink_schedule, chain_schedule);
    }
}
