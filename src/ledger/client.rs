//! Ledger Client
//!
//! Read/query/send wrapper around the chain RPC. The transport is a trait
//! object so the engine runs the same against a real node or the in-process
//! [`MemoryChain`](super::memory::MemoryChain). Transient failures are
//! retried with exponential backoff; reverts are returned immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::game::state::{Address, EliminationReason, GameConfig, GameId, ShrinkStep, Timestamp};
use crate::ledger::events::{LedgerLog, LedgerWinners};

// =============================================================================
// CALLS AND READS
// =============================================================================

/// Contract method invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    /// createGame
    CreateGame { config: GameConfig },
    /// register (payable)
    Register { game_id: GameId, player: Address, value: u128 },
    /// startGame
    StartGame { game_id: GameId },
    /// recordKill
    RecordKill { game_id: GameId, hunter: Address, target: Address },
    /// eliminatePlayer
    EliminatePlayer { game_id: GameId, player: Address, reason: EliminationReason },
    /// endGame
    EndGame { game_id: GameId, winners: LedgerWinners },
    /// triggerCancellation
    TriggerCancellation { game_id: GameId },
    /// triggerExpiry
    TriggerExpiry { game_id: GameId },
    /// claimPrize
    ClaimPrize { game_id: GameId, claimant: Address },
    /// claimRefund
    ClaimRefund { game_id: GameId, claimant: Address },
}

impl LedgerCall {
    /// Contract method name.
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::CreateGame { .. } => "createGame",
            LedgerCall::Register { .. } => "register",
            LedgerCall::StartGame { .. } => "startGame",
            LedgerCall::RecordKill { .. } => "recordKill",
            LedgerCall::EliminatePlayer { .. } => "eliminatePlayer",
            LedgerCall::EndGame { .. } => "endGame",
            LedgerCall::TriggerCancellation { .. } => "triggerCancellation",
            LedgerCall::TriggerExpiry { .. } => "triggerExpiry",
            LedgerCall::ClaimPrize { .. } => "claimPrize",
            LedgerCall::ClaimRefund { .. } => "claimRefund",
        }
    }

    /// Whether the contract accepts this call only from its operator.
    pub fn operator_only(&self) -> bool {
        matches!(
            self,
            LedgerCall::StartGame { .. }
                | LedgerCall::RecordKill { .. }
                | LedgerCall::EliminatePlayer { .. }
                | LedgerCall::EndGame { .. }
        )
    }
}

/// Result of a mined transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Block the transaction landed in.
    pub block: u64,
    /// Value paid out (claims) or created id (createGame), else 0.
    pub value: u128,
}

/// Current chain head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    /// Latest block.
    pub block: u64,
    /// Sequence of the latest log.
    pub sequence: u64,
    /// Latest block timestamp.
    pub timestamp: Timestamp,
}

/// Contract-level phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnChainPhase {
    /// Registration open.
    Registration,
    /// Started.
    Active,
    /// Winners recorded.
    Ended,
    /// Refunds open.
    Cancelled,
}

/// Contract view of a game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnChainGameState {
    /// Phase.
    pub phase: OnChainPhase,
    /// Registered players.
    pub player_count: u32,
    /// Players not eliminated.
    pub alive_count: u32,
    /// Fees collected.
    pub total_collected: u128,
    /// Winners once ended.
    pub winners: Option<LedgerWinners>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Connection or node failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Contract rejected the call.
    #[error("reverted: {0}")]
    Reverted(String),

    /// No answer in time.
    #[error("request timed out")]
    Timeout,
}

impl RpcError {
    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout)
    }
}

/// Ledger client errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Non-retryable RPC error.
    #[error("ledger rpc: {0}")]
    Rpc(#[from] RpcError),

    /// Gave up after repeated transient failures.
    #[error("{op} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        last: RpcError,
    },
}

// =============================================================================
// TRANSPORT TRAIT
// =============================================================================

/// Chain RPC transport.
pub trait ChainRpc: Send + Sync {
    /// Latest block and log sequence.
    fn head(&self) -> BoxFuture<'_, Result<ChainHead, RpcError>>;

    /// Up to `limit` logs with sequence greater than `after`, in order.
    fn logs_since(&self, after: u64, limit: usize) -> BoxFuture<'_, Result<Vec<LedgerLog>, RpcError>>;

    /// Every log for one game, in order.
    fn game_logs(&self, game_id: GameId) -> BoxFuture<'_, Result<Vec<LedgerLog>, RpcError>>;

    /// Live notifications of new logs.
    fn subscribe(&self) -> broadcast::Receiver<LedgerLog>;

    /// Read a game's configuration.
    fn game_config(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<GameConfig>, RpcError>>;

    /// Read a game's contract state.
    fn game_state(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<OnChainGameState>, RpcError>>;

    /// Read a game's shrink schedule.
    fn shrink_schedule(&self, game_id: GameId) -> BoxFuture<'_, Result<Option<Vec<ShrinkStep>>, RpcError>>;

    /// Send a transaction and wait for it to be mined.
    fn submit(&self, call: LedgerCall) -> BoxFuture<'_, Result<TxReceipt, RpcError>>;
}

// =============================================================================
// RETRY
// =============================================================================

/// Exponential backoff settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Delay cap.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Retrying front for a [`ChainRpc`].
#[derive(Clone)]
pub struct LedgerClient {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
}

impl LedgerClient {
    /// Wrap a transport.
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy) -> Self {
        Self { rpc, retry }
    }

    async fn with_retry<'a, T, F, Fut>(&'a self, op: &'static str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut(&'a dyn ChainRpc) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call(self.rpc.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(LedgerError::Rpc(err)),
                Err(err) if attempt >= self.retry.max_attempts => {
                    warn!(op, attempt, error = %err, "Ledger call giving up");
                    return Err(LedgerError::RetriesExhausted { op, attempts: attempt, last: err });
                }
                Err(err) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(op, attempt, ?delay, error = %err, "Ledger call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Latest head.
    pub async fn head(&self) -> Result<ChainHead, LedgerError> {
        self.with_retry("head", |rpc| rpc.head()).await
    }

    /// Next batch of logs after `after`.
    pub async fn logs_since(&self, after: u64, limit: usize) -> Result<Vec<LedgerLog>, LedgerError> {
        self.with_retry("logs_since", |rpc| rpc.logs_since(after, limit)).await
    }

    /// Full history of one game.
    pub async fn game_logs(&self, game_id: GameId) -> Result<Vec<LedgerLog>, LedgerError> {
        self.with_retry("game_logs", |rpc| rpc.game_logs(game_id)).await
    }

    /// Game configuration.
    pub async fn game_config(&self, game_id: GameId) -> Result<Option<GameConfig>, LedgerError> {
        self.with_retry("game_config", |rpc| rpc.game_config(game_id)).await
    }

    /// Contract state of a game.
    pub async fn game_state(&self, game_id: GameId) -> Result<Option<OnChainGameState>, LedgerError> {
        self.with_retry("game_state", |rpc| rpc.game_state(game_id)).await
    }

    /// Shrink schedule of a game.
    pub async fn shrink_schedule(&self, game_id: GameId) -> Result<Option<Vec<ShrinkStep>>, LedgerError> {
        self.with_retry("shrink_schedule", |rpc| rpc.shrink_schedule(game_id)).await
    }

    /// Send a transaction.
    pub async fn submit(&self, call: LedgerCall) -> Result<TxReceipt, LedgerError> {
        let method = call.method();
        debug!(method, "Submitting ledger call");
        self.with_retry(method, |rpc| rpc.submit(call.clone())).await
    }

    /// Live log notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerLog> {
        self.rpc.subscribe()
    }
}
