//! Subscriber Hub
//!
//! Per-game fan-out of rendered events. Delivery is a non-blocking enqueue
//! onto each subscriber's bounded queue so it can run while the game's write
//! lock is held; the connection's writer task does the socket I/O.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::events::{Audience, GameEvent};
use crate::game::state::{Game, GameId, PlayerNumber};
use crate::network::protocol::ServerMessage;
use crate::network::render::render_events;

/// Identifies one subscription.
pub type SubscriberId = Uuid;

/// Why the hub let go of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kick {
    /// Outbound queue was full or closed.
    FellBehind,
    /// The game was unloaded; nothing more will be sent for it.
    GameClosed,
}

struct Subscriber {
    id: SubscriberId,
    player: Option<PlayerNumber>,
    tx: mpsc::Sender<ServerMessage>,
    kick: Option<oneshot::Sender<Kick>>,
}

impl Subscriber {
    fn kick(&mut self, reason: Kick) {
        if let Some(kick) = self.kick.take() {
            let _ = kick.send(reason);
        }
    }

    fn wants(&self, audience: Audience) -> bool {
        match audience {
            Audience::Game => true,
            Audience::Player(n) => self.player == Some(n),
        }
    }
}

/// Subscribers grouped by game.
#[derive(Default)]
pub struct Hub {
    games: Mutex<BTreeMap<GameId, Vec<Subscriber>>>,
}

impl Hub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<GameId, Vec<Subscriber>>> {
        self.games.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection for a game.
    ///
    /// `kick` fires if the hub drops the subscriber, with the reason.
    pub fn subscribe(
        &self,
        game_id: GameId,
        player: Option<PlayerNumber>,
        tx: mpsc::Sender<ServerMessage>,
        kick: Option<oneshot::Sender<Kick>>,
    ) -> SubscriberId {
        let id = Uuid::new_v4();
        self.lock()
            .entry(game_id)
            .or_default()
            .push(Subscriber { id, player, tx, kick });
        debug!(game_id, %id, ?player, "Subscribed");
        id
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, game_id: GameId, id: SubscriberId) {
        let mut games = self.lock();
        if let Some(subs) = games.get_mut(&game_id) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                games.remove(&game_id);
            }
        }
    }

    /// Render and deliver a batch of events for a game.
    pub fn dispatch(&self, game: &Game, events: &[GameEvent]) {
        if events.is_empty() {
            return;
        }
        for (audience, message) in render_events(game, events) {
            self.deliver(game.id, audience, &message);
        }
    }

    /// Enqueue one message to every matching subscriber.
    ///
    /// Subscribers whose queue is full or closed are dropped.
    pub fn deliver(&self, game_id: GameId, audience: Audience, message: &ServerMessage) {
        let mut games = self.lock();
        let Some(subs) = games.get_mut(&game_id) else {
            return;
        };
        subs.retain_mut(|sub| {
            if !sub.wants(audience) {
                return true;
            }
            match sub.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(e) => {
                    info!(game_id, id = %sub.id, reason = %e, "Dropping slow subscriber");
                    sub.kick(Kick::FellBehind);
                    false
                }
            }
        });
        if subs.is_empty() {
            games.remove(&game_id);
        }
    }

    /// Drop every subscriber of a game and tell each connection to close.
    pub fn close_game(&self, game_id: GameId) {
        let Some(mut subs) = self.lock().remove(&game_id) else {
            return;
        };
        for sub in &mut subs {
            sub.kick(Kick::GameClosed);
        }
        debug!(game_id, count = subs.len(), "Closed game subscriptions");
    }

    /// Subscribers of a game.
    pub fn subscriber_count(&self, game_id: GameId) -> usize {
        self.lock().get(&game_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::render::leaderboard;
    use crate::game::state::fixtures::game_with_players;

    #[tokio::test]
    async fn test_player_audience_filtering() {
        let hub = Hub::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (spec_tx, mut spec_rx) = mpsc::channel(8);
        hub.subscribe(1, Some(1), tx1, None);
        hub.subscribe(1, Some(2), tx2, None);
        hub.subscribe(1, None, spec_tx, None);

        let game = game_with_players(1, 3);
        hub.dispatch(&game, &[GameEvent::HunterUpdated { player: 2, hunter: 3 }]);
        hub.dispatch(&game, &[GameEvent::GameCancelled]);

        assert_eq!(rx1.recv().await.unwrap().type_name(), "game:cancelled");
        assert_eq!(rx2.recv().await.unwrap().type_name(), "hunter:updated");
        assert_eq!(rx2.recv().await.unwrap().type_name(), "game:cancelled");
        assert_eq!(spec_rx.recv().await.unwrap().type_name(), "game:cancelled");
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_kicks() {
        let hub = Hub::new();
        let (tx, _rx) = mpsc::channel(1);
        let (kick_tx, kick_rx) = oneshot::channel();
        hub.subscribe(5, None, tx, Some(kick_tx));

        let game = game_with_players(5, 2);
        let message = leaderboard(&game);
        hub.deliver(5, Audience::Game, &message);
        assert_eq!(hub.subscriber_count(5), 1);
        hub.deliver(5, Audience::Game, &message);
        assert_eq!(hub.subscriber_count(5), 0);
        assert_eq!(kick_rx.await, Ok(Kick::FellBehind));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let hub = Hub::new();
        let (tx, mut rx) = mpsc::channel(4);
        let (kick_tx, kick_rx) = oneshot::channel();
        let a = hub.subscribe(2, None, tx.clone(), None);
        hub.subscribe(2, Some(1), tx, Some(kick_tx));
        hub.unsubscribe(2, a);
        assert_eq!(hub.subscriber_count(2), 1);

        hub.close_game(2);
        assert_eq!(hub.subscriber_count(2), 0);
        assert_eq!(kick_rx.await, Ok(Kick::GameClosed));
        assert!(rx.recv().await.is_none());
    }
}
