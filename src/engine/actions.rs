//! Player Actions
//!
//! Requests arriving from the gateway. Validation failures go back to the
//! acting connection only and never mutate the game.

use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::engine::{Engine, GameHandle};
use crate::game::heartbeat::HeartbeatError;
use crate::game::phase::CheckinError;
use crate::game::ring::KillRejection;
use crate::core::geo::GeoPoint;
use crate::game::state::{Address, GameError, GameId, Phase, PlayerNumber};
use crate::ledger::client::{LedgerCall, LedgerError};
use crate::network::hub::{Kick, SubscriberId};
use crate::network::protocol::ServerMessage;
use crate::network::render;

/// Why an action was refused.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Kill claim refused.
    #[error("kill rejected: {0}")]
    Kill(#[from] KillRejection),

    /// Heartbeat proof refused.
    #[error("heartbeat rejected: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// Check-in refused.
    #[error("check-in rejected: {0}")]
    Checkin(#[from] CheckinError),

    /// Game rule violation.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Game is not loaded.
    #[error("unknown game {0}")]
    UnknownGame(GameId),

    /// Address has no seat in the game.
    #[error("address is not registered in game {0}")]
    NotRegistered(GameId),

    /// Coordinates out of range.
    #[error("invalid location")]
    InvalidLocation,

    /// Ledger refused or could not be reached.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ActionError {
    /// Stable client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Kill(e) => e.code(),
            ActionError::Heartbeat(e) => e.code(),
            ActionError::Checkin(e) => e.code(),
            ActionError::Game(GameError::Terminal(_)) => "game-over",
            ActionError::Game(_) => "invalid-action",
            ActionError::UnknownGame(_) => "unknown-game",
            ActionError::NotRegistered(_) => "not-registered",
            ActionError::InvalidLocation => "invalid-location",
            ActionError::Ledger(_) => "ledger-unavailable",
        }
    }

    /// Wire message for the acting client.
    ///
    /// Heartbeat refusals have their own message type.
    pub fn to_message(&self) -> ServerMessage {
        match self {
            ActionError::Heartbeat(e) => ServerMessage::heartbeat_error(e.code()),
            other => ServerMessage::error(other.code()),
        }
    }
}

/// An authenticated player's seat in one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSession {
    /// Game joined.
    pub game_id: GameId,
    /// Wallet address.
    pub address: Address,
    /// Seat number in the game.
    pub number: PlayerNumber,
}

/// A connection's subscription to a game.
#[derive(Debug, Clone, Copy)]
pub struct Joined {
    /// Seat, when the connection authenticated as a player.
    pub session: Option<PlayerSession>,
    /// Hub subscription to remove on disconnect.
    pub subscriber: SubscriberId,
}

impl Engine {
    /// Subscribe a connection to a game, as a player or a spectator.
    ///
    /// The welcome messages (`auth:success` for players, then the
    /// leaderboard) are queued under the game lock before the subscription
    /// is added, so no broadcast can overtake them.
    #[instrument(skip(self, tx, kick))]
    pub async fn join(
        &self,
        game_id: GameId,
        player: Option<Address>,
        tx: mpsc::Sender<ServerMessage>,
        kick: Option<oneshot::Sender<Kick>>,
    ) -> Result<Joined, ActionError> {
        let handle = self.registry.get(game_id).await.ok_or(ActionError::UnknownGame(game_id))?;
        let game = handle.read().await;

        let session = match player {
            Some(address) => {
                let number = game.number_of(&address).ok_or(ActionError::NotRegistered(game_id))?;
                Some(PlayerSession { game_id, address, number })
            }
            None => None,
        };

        let welcome = session
            .and_then(|s| render::auth_success(&game, s.number))
            .into_iter()
            .chain(std::iter::once(render::leaderboard(&game)));
        for message in welcome {
            if tx.try_send(message).is_err() {
                warn!(game_id, "Connection queue closed during join");
            }
        }

        let subscriber = self.hub.subscribe(game_id, session.map(|s| s.number), tx, kick);
        info!(game_id, player = ?session.map(|s| s.number), "Joined game");
        Ok(Joined { session, subscriber })
    }

    /// Leave a game's broadcasts.
    pub fn leave(&self, game_id: GameId, subscriber: SubscriberId) {
        self.hub.unsubscribe(game_id, subscriber);
    }

    /// Validate a kill claim and submit it to the ledger.
    ///
    /// The kill takes effect when the `KillRecorded` log is reconciled.
    #[instrument(skip(self))]
    pub async fn claim_kill(&self, session: PlayerSession, target: PlayerNumber) -> Result<(), ActionError> {
        let handle = self.handle(session.game_id).await?;
        let call = {
            let game = handle.read().await;
            game.adjudicate_kill(Some(session.number), target)?;
            let target = game.player(target).ok_or(KillRejection::NotRegistered)?;
            LedgerCall::RecordKill { game_id: session.game_id, hunter: session.address, target: target.address }
        };

        let receipt = self.ledger.submit(call).await?;
        info!(game_id = session.game_id, hunter = session.number, target, block = receipt.block, "Kill recorded on ledger");
        Ok(())
    }

    /// Check in at the meeting point.
    pub async fn check_in(&self, session: PlayerSession, location: Option<GeoPoint>) -> Result<(), ActionError> {
        let handle = self.handle(session.game_id).await?;
        let rules = self.config.rules;
        self.mutate(&handle, |game, now| {
            game.check_in(Some(session.number), location, now, &rules).map_err(ActionError::from)
        })
        .await?;
        Ok(())
    }

    /// Submit a heartbeat scan.
    pub async fn heartbeat_scan(&self, session: PlayerSession, scanned: PlayerNumber) -> Result<(), ActionError> {
        let handle = self.handle(session.game_id).await?;
        let interval = self.config.rules.heartbeat_interval_secs;
        self.mutate(&handle, |game, now| {
            game.submit_heartbeat(session.number, scanned, now, interval).map_err(ActionError::from)
        })
        .await?;
        Ok(())
    }

    /// Report a location; enforces the zone during hunting.
    pub async fn update_location(&self, session: PlayerSession, point: GeoPoint) -> Result<(), ActionError> {
        let handle = self.handle(session.game_id).await?;
        let grace = self.config.rules.zone_grace_secs;
        self.mutate(&handle, |game, now| {
            game.update_location(session.number, point, now, grace).map_err(ActionError::from)
        })
        .await?;
        Ok(())
    }

    /// Phase of a loaded game.
    pub async fn phase(&self, game_id: GameId) -> Option<Phase> {
        let handle = self.registry.get(game_id).await?;
        let phase = handle.read().await.phase;
        Some(phase)
    }

    async fn handle(&self, game_id: GameId) -> Result<GameHandle, ActionError> {
        self.registry.get(game_id).await.ok_or(ActionError::UnknownGame(game_id))
    }
}
