//! In-Process Ledger
//!
//! A contract stand-in that enforces the same rules as the deployed game
//! contract and emits the same events. Every successful call mines one block.
//! Used for development and tests; includes hooks for injecting transport
//! failures and dropped notifications.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::debug;

use crate::game::state::{Address, GameConfig, GameId, ShrinkStep, Timestamp, TOTAL_BPS};
use crate::ledger::client::{
    ChainHead, ChainRpc, LedgerCall, OnChainGameState, OnChainPhase, RpcError, TxReceipt,
};
use crate::ledger::events::{EventKey, LedgerEvent, LedgerLog, LedgerWinners};

/// Capacity of the live notification channel.
const NOTIFY_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ChainGame {
    config: GameConfig,
    phase: OnChainPhase,
    players: Vec<Address>,
    alive: BTreeSet<Address>,
    total_collected: u128,
    winners: Option<LedgerWinners>,
    claimed: BTreeSet<Address>,
}

#[derive(Debug, Default)]
struct ChainState {
    block: u64,
    now: Timestamp,
    logs: Vec<LedgerLog>,
    games: BTreeMap<GameId, ChainGame>,
    next_game_id: GameId,
    fail_next: u32,
    suppress_broadcast: u32,
}

/// In-process contract.
pub struct MemoryChain {
    operator: Address,
    state: Mutex<ChainState>,
    notify: broadcast::Sender<LedgerLog>,
}

fn revert(reason: impl Into<String>) -> RpcError {
    RpcError::Reverted(reason.into())
}

impl MemoryChain {
    /// Create an empty chain at time `now`.
    pub fn new(operator: Address, now: Timestamp) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            operator,
            state: Mutex::new(ChainState { now, next_game_id: 1, ..ChainState::default() }),
            notify,
        }
    }

    /// Operator address.
    pub fn operator(&self) -> Address {
        self.operator
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set block time for subsequent blocks.
    pub fn set_time(&self, now: Timestamp) {
        self.lock().now = now;
    }

    /// Fail the next `n` RPC calls with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Record the next `n` logs without notifying subscribers.
    pub fn suppress_broadcast(&self, n: u32) {
        self.lock().suppress_broadcast = n;
    }

    /// Total logs emitted.
    pub fn log_count(&self) -> usize {
        self.lock().logs.len()
    }

    fn check_transport(state: &mut ChainState) -> Result<(), RpcError> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RpcError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    /// Execute a call synchronously, sent by the operator.
    pub fn execute(&self, call: LedgerCall) -> Result<TxReceipt, RpcError> {
        self.execute_from(self.operator, call)
    }

    /// Execute a call sent by `sender`.
    pub fn execute_from(&self, sender: Address, call: LedgerCall) -> Result<TxReceipt, RpcError> {
        let mut state = self.lock();
        Self::check_transport(&mut state)?;
        if call.operator_only() && sender != self.operator {
            return Err(revert(format!("{} is operator only", call.method())));
        }

        let now = state.now;
        let (events, value) = Self::apply(&mut state, call, now)?;

        state.block += 1;
        let block = state.block;
        let mut mined = Vec::with_capacity(events.len());
        for (i, event) in events.into_iter().enumerate() {
            let log = LedgerLog {
                key: EventKey::new(block, i as u32),
                sequence: state.logs.len() as u64 + 1,
                timestamp: now,
                event,
            };
            state.logs.push(log.clone());
            mined.push(log);
        }

        for log in mined {
            if state.suppress_broadcast > 0 {
                state.suppress_broadcast -= 1;
                debug!(sequence = log.sequence, "Suppressed notification");
                continue;
            }
            // No receivers is fine
            let _ = self.notify.send(log);
        }

        Ok(TxReceipt { block, value })
    }

    fn apply(
        state: &mut ChainState,
        call: LedgerCall,
        now: Timestamp,
    ) -> Result<(Vec<LedgerEvent>, u128), RpcError> {
        match call {
            LedgerCall::CreateGame { config } => {
                config.validate().map_err(|e| revert(format!("invalid config: {e}")))?;
                if config.registration_deadline <= now {
                    return Err(revert("registration deadline in the past"));
                }
                let game_id = state.next_game_id;
                state.next_game_id += 1;
                state.games.insert(game_id, ChainGame {
                    config: config.clone(),
                    phase: OnChainPhase::Registration,
                    players: Vec::new(),
                    alive: BTreeSet::new(),
                    total_collected: 0,
                    winners: None,
                    claimed: BTreeSet::new(),
                });
                Ok((vec![LedgerEvent::GameCreated { game_id, config }], game_id as u128))
            }

            LedgerCall::Register { game_id, player, value } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Registration)?;
                if now > game.config.registration_deadline {
                    return Err(revert("registration closed"));
                }
                if value != game.config.entry_fee {
                    return Err(revert("wrong entry fee"));
                }
                if game.players.len() as u32 >= game.config.max_players {
                    return Err(revert("game full"));
                }
                if game.players.contains(&player) {
                    return Err(revert("already registered"));
                }
                game.players.push(player);
                game.alive.insert(player);
                game.total_collected += value;
                let player_number = game.players.len() as u32;
                Ok((vec![LedgerEvent::PlayerRegistered { game_id, player, player_number }], 0))
            }

            LedgerCall::StartGame { game_id } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Registration)?;
                if now < game.config.game_start_time {
                    return Err(revert("too early"));
                }
                if (game.players.len() as u32) < game.config.min_players {
                    return Err(revert("not enough players"));
                }
                game.phase = OnChainPhase::Active;
                Ok((vec![LedgerEvent::GameStarted { game_id }], 0))
            }

            LedgerCall::RecordKill { game_id, hunter, target } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Active)?;
                if hunter == target {
                    return Err(revert("self kill"));
                }
                if !game.alive.contains(&hunter) || !game.alive.contains(&target) {
                    return Err(revert("player not alive"));
                }
                game.alive.remove(&target);
                Ok((vec![LedgerEvent::KillRecorded { game_id, hunter, target }], 0))
            }

            LedgerCall::EliminatePlayer { game_id, player, reason } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Active)?;
                if !game.alive.remove(&player) {
                    return Err(revert("player not alive"));
                }
                Ok((vec![LedgerEvent::PlayerEliminated { game_id, player, eliminator: None, reason }], 0))
            }

            LedgerCall::EndGame { game_id, winners } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Active)?;
                let listed = [winners.first, winners.second, winners.third, winners.top_killer];
                if listed.iter().flatten().any(|a| !game.players.contains(a)) {
                    return Err(revert("winner not registered"));
                }
                game.phase = OnChainPhase::Ended;
                game.winners = Some(winners);
                Ok((vec![LedgerEvent::GameEnded { game_id, winners }], 0))
            }

            LedgerCall::TriggerCancellation { game_id } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Registration)?;
                if now < game.config.registration_deadline {
                    return Err(revert("registration still open"));
                }
                if game.players.len() as u32 >= game.config.min_players {
                    return Err(revert("enough players"));
                }
                game.phase = OnChainPhase::Cancelled;
                Ok((vec![LedgerEvent::GameCancelled { game_id }], 0))
            }

            LedgerCall::TriggerExpiry { game_id } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Registration)?;
                if now < game.config.expiry_deadline() {
                    return Err(revert("not expired"));
                }
                game.phase = OnChainPhase::Cancelled;
                Ok((vec![LedgerEvent::GameCancelled { game_id }], 0))
            }

            LedgerCall::ClaimPrize { game_id, claimant } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Ended)?;
                let amount = Self::prize_for(game, claimant);
                if amount == 0 {
                    return Err(revert("nothing to claim"));
                }
                if !game.claimed.insert(claimant) {
                    return Err(revert("already claimed"));
                }
                Ok((Vec::new(), amount))
            }

            LedgerCall::ClaimRefund { game_id, claimant } => {
                let game = Self::game_mut(state, game_id)?;
                Self::require_phase(game, OnChainPhase::Cancelled)?;
                if !game.players.contains(&claimant) {
                    return Err(revert("not registered"));
                }
                if !game.claimed.insert(claimant) {
                    return Err(revert("already claimed"));
                }
                Ok((Vec::new(), game.config.entry_fee))
            }
        }
    }

    fn game_mut(state: &mut ChainState, game_id: GameId) -> Result<&mut ChainGame, RpcError> {
        state.games.get_mut(&game_id).ok_or_else(|| revert("unknown game"))
    }

    fn require_phase(game: &ChainGame, phase: OnChainPhase) -> Result<(), RpcError> {
        if game.phase == phase {
            Ok(())
        } else {
            Err(revert(format!("wrong phase: {:?}", game.phase)))
        }
    }

    /// Sum of every share `claimant` is entitled to.
    fn prize_for(game: &ChainGame, claimant: Address) -> u128 {
        let Some(winners) = game.winners else {
            return 0;
        };
        let split = game.config.prize_split;
        let shares = [
            (winners.first, split.first_bps as u32),
            (winners.second, split.second_bps as u32),
            (winners.third, split.third_bps as u32),
            (winners.top_killer, split.kills_bps as u32),
            (Some(game.config.creator), split.creator_bps as u32),
        ];
        let bps: u32 = shares
            .iter()
            .filter(|(who, _)| *who == Some(claimant))
            .map(|(_, bps)| *bps)
            .sum();
        game.total_collected * bps as u128 / TOTAL_BPS as u128
    }

    fn read<T>(&self, f: impl FnOnce(&ChainState) -> T) -> Result<T, RpcError> {
        let mut state = self.lock();
        Self::check_transport(&mut state)?;
        Ok(f(&state))
    }
}

impl ChainRpc for MemoryChain {
    fn head(&self) -> BoxFuture<'_, Result<ChainHead, RpcError>> {
        let result = self.read(|s| ChainHead {
            block: s.block,
            sequence: s.logs.len() as u64,
            timestamp: s.now,
        });
        Box::pin(async move { result })
    }

    fn logs_since(&self, after: u64, limit: usize) -> BoxFuture<'_, Result<Vec<LedgerLog>, RpcError>> {
        let result = self.read(|s| {
            s.logs
                .iter()
                .skip(after as usize)
                .take(limit)
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }

    fn game_logs(&self, game_id: GameId) -> BoxFuture<'_, Result<Vec<LedgerLog>, RpcError>> {
        let result = self.read(|s| {
            s.logs
                .iter()
                .filter(|log| log.event.game_id() == game_id)
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerLog> {
        self.notify.subscribe()
    }

    fn game_config(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<GameConfig>, RpcError>> {
        let result = self.read(|s| s.games.get(&game_id).map(|g| g.config.clone()));
        Box::pin(async move { result })
    }

    fn game_state(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<OnChainGameState>, RpcError>> {
        let result = self.read(|s| {
            s.games.get(&game_id).map(|g| OnChainGameState {
                phase: g.phase,
                player_count: g.players.len() as u32,
                alive_count: g.alive.len() as u32,
                total_collected: g.total_collected,
                winners: g.winners,
            })
        });
        Box::pin(async move { result })
    }

    fn shrink_schedule(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<Vec<ShrinkStep>>, RpcError>> {
        let result = self.read(|s| s.games.get(&game_id).map(|g| g.config.shrink_schedule.clone()));
        Box::pin(async move { result })
    }

    fn submit(&self, call: LedgerCall) -> BoxFuture<'_, Result<TxReceipt, RpcError>> {
        let result = self.execute(call);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::EliminationReason;
    use crate::game::state::fixtures::{addr, config};

    const OPERATOR: u8 = 250;

    fn chain_with_game(players: u8) -> (MemoryChain, GameId) {
        let chain = MemoryChain::new(addr(OPERATOR), 0);
        let receipt = chain.execute(LedgerCall::CreateGame { config: config(2, 4) }).unwrap();
        let game_id = receipt.value as GameId;
        for i in 1..=players {
            chain.execute(LedgerCall::Register { game_id, player: addr(i), value: 1_000 }).unwrap();
        }
        (chain, game_id)
    }

    #[tokio::test]
    async fn test_logs_are_sequenced() {
        let (chain, game_id) = chain_with_game(3);
        let logs = chain.logs_since(0, 100).await.unwrap();
        assert_eq!(logs.len(), 4);
        for (i, log) in logs.iter().enumerate() {
            assert_eq!(log.sequence, i as u64 + 1);
            assert_eq!(log.event.game_id(), game_id);
        }
        assert!(matches!(logs[3].event, LedgerEvent::PlayerRegistered { player_number: 3, .. }));

        let tail = chain.logs_since(2, 1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 3);
    }

    #[test]
    fn test_registration_rules() {
        let (chain, game_id) = chain_with_game(1);
        let wrong_fee = chain.execute(LedgerCall::Register { game_id, player: addr(9), value: 1 });
        assert!(matches!(wrong_fee, Err(RpcError::Reverted(_))));
        let duplicate = chain.execute(LedgerCall::Register { game_id, player: addr(1), value: 1_000 });
        assert!(matches!(duplicate, Err(RpcError::Reverted(_))));

        chain.set_time(1_001);
        let late = chain.execute(LedgerCall::Register { game_id, player: addr(9), value: 1_000 });
        assert!(matches!(late, Err(RpcError::Reverted(_))));
    }

    #[test]
    fn test_start_requires_time_and_players() {
        let (chain, game_id) = chain_with_game(1);
        chain.set_time(2_000);
        assert!(chain.execute(LedgerCall::StartGame { game_id }).is_err());
        chain.execute(LedgerCall::TriggerCancellation { game_id }).unwrap();

        let (chain, game_id) = chain_with_game(2);
        chain.set_time(1_999);
        assert!(chain.execute(LedgerCall::StartGame { game_id }).is_err());
        chain.set_time(2_000);
        chain.execute(LedgerCall::StartGame { game_id }).unwrap();
        assert!(chain.execute(LedgerCall::TriggerCancellation { game_id }).is_err());
    }

    #[tokio::test]
    async fn test_prize_and_refund_claims() {
        let (chain, game_id) = chain_with_game(3);
        chain.set_time(2_000);
        chain.execute(LedgerCall::StartGame { game_id }).unwrap();
        chain.execute(LedgerCall::RecordKill { game_id, hunter: addr(1), target: addr(2) }).unwrap();
        chain.execute(LedgerCall::EliminatePlayer {
            game_id,
            player: addr(3),
            reason: EliminationReason::Zone,
        }).unwrap();
        let winners = LedgerWinners {
            first: Some(addr(1)),
            second: Some(addr(3)),
            third: Some(addr(2)),
            top_killer: Some(addr(1)),
        };
        chain.execute(LedgerCall::EndGame { game_id, winners }).unwrap();

        // 3000 collected; first 40% + kills 15%
        let first = chain.execute(LedgerCall::ClaimPrize { game_id, claimant: addr(1) }).unwrap();
        assert_eq!(first.value, 1_650);
        assert!(chain.execute(LedgerCall::ClaimPrize { game_id, claimant: addr(1) }).is_err());
        let creator = chain.execute(LedgerCall::ClaimPrize { game_id, claimant: addr(200) }).unwrap();
        assert_eq!(creator.value, 150);

        let state = chain.game_state(game_id).await.unwrap().unwrap();
        assert_eq!(state.phase, OnChainPhase::Ended);
        assert_eq!(state.alive_count, 1);
        assert!(chain.execute(LedgerCall::ClaimRefund { game_id, claimant: addr(2) }).is_err());
    }

    #[test]
    fn test_operator_only_calls() {
        let (chain, game_id) = chain_with_game(2);
        chain.set_time(2_000);
        let stranger = chain.execute_from(addr(1), LedgerCall::StartGame { game_id });
        assert!(matches!(stranger, Err(RpcError::Reverted(reason)) if reason.contains("startGame")));
        assert_eq!(chain.log_count(), 3);

        chain.execute_from(addr(OPERATOR), LedgerCall::StartGame { game_id }).unwrap();
        let kill = LedgerCall::RecordKill { game_id, hunter: addr(1), target: addr(2) };
        assert!(chain.execute_from(addr(1), kill.clone()).is_err());
        chain.execute(kill).unwrap();

        // Anyone may register
        let (chain, game_id) = chain_with_game(0);
        chain.execute_from(addr(5), LedgerCall::Register { game_id, player: addr(5), value: 1_000 }).unwrap();
    }

    #[tokio::test]
    async fn test_suppressed_logs_still_recorded() {
        let (chain, game_id) = chain_with_game(0);
        let mut rx = chain.subscribe();
        chain.suppress_broadcast(1);
        chain.execute(LedgerCall::Register { game_id, player: addr(1), value: 1_000 }).unwrap();
        chain.execute(LedgerCall::Register { game_id, player: addr(2), value: 1_000 }).unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.sequence, 3);
        assert_eq!(chain.game_logs(game_id).await.unwrap().len(), 3);
    }
}
