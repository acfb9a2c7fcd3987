//! Timer Driver
//!
//! One periodic sweep over every loaded game: closes windows, expires
//! heartbeats, enforces the zone and resubmits due ledger calls. Finished
//! games are unloaded once their grace period has passed.

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::engine::Engine;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Games ticked.
    pub ticked: usize,
    /// Events produced.
    pub events: usize,
    /// Games unloaded.
    pub evicted: usize,
}

impl Engine {
    /// Tick every game once.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let rules = self.config.rules;

        for game_id in self.registry.ids().await {
            let Some(handle) = self.registry.get(game_id).await else {
                continue;
            };

            let finished_at = {
                let game = handle.read().await;
                game.phase.is_terminal().then(|| game.terminal_at.unwrap_or(0))
            };
            if let Some(at) = finished_at {
                if self.now() >= at.saturating_add(self.config.eviction_grace_secs) {
                    self.registry.remove(game_id).await;
                    self.hub.close_game(game_id);
                    info!(game_id, "Evicted finished game");
                    report.evicted += 1;
                }
                continue;
            }

            match self.mutate(&handle, |game, now| game.tick(now, &rules)).await {
                Ok(events) => {
                    report.ticked += 1;
                    report.events += events.len();
                }
                Err(e) => warn!(game_id, error = %e, "Tick failed"),
            }
        }
        report
    }

    /// Sweep on the configured interval until shutdown.
    #[instrument(skip(self, shutdown))]
    pub async fn run_timers(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.events > 0 || report.evicted > 0 {
                        debug!(?report, "Sweep");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Timer driver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::engine::harness::Harness;
    use crate::game::state::fixtures::{addr, config};
    use crate::game::state::{EliminationReason, Phase};
    use crate::ledger::client::LedgerCall;
    use crate::network::hub::Kick;

    async fn settle(h: &Harness) {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.engine.backfill().await.unwrap();
            if h.engine.cursor().await.sequence == h.chain.log_count() as u64 {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_sweep_submits_start_when_due() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        h.engine.backfill().await.unwrap();

        h.engine.sweep().await;
        assert_eq!(h.chain.log_count(), 4);

        h.set_time(2_000);
        h.engine.sweep().await;
        settle(&h).await;
        assert_eq!(h.engine.phase(game_id).await, Some(Phase::Checkin));
    }

    #[tokio::test]
    async fn test_sweep_cancels_underfilled_game() {
        let h = Harness::new();
        let game_id = h.create_game(config(4, 8), 2);
        h.engine.backfill().await.unwrap();
        h.set_time(1_001);
        h.engine.sweep().await;
        settle(&h).await;
        assert_eq!(h.engine.phase(game_id).await, Some(Phase::Cancelled));
    }

    #[tokio::test]
    async fn test_min_four_five_register_four_check_in() {
        let h = Harness::new();
        let game_id = h.create_game(config(4, 8), 5);
        h.engine.backfill().await.unwrap();
        h.set_time(2_000);
        h.chain.execute(LedgerCall::StartGame { game_id }).unwrap();
        h.engine.backfill().await.unwrap();
        let handle = h.engine.registry().get(game_id).await.unwrap();
        let rules = h.engine.config().rules;
        for n in 1..=4 {
            h.engine.mutate(&handle, |g, now| g.check_in(Some(n), None, now, &rules)).await.unwrap();
        }

        h.set_time(2_000 + rules.checkin_secs);
        let report = h.engine.sweep().await;
        assert!(report.events > 0);
        settle(&h).await;

        let game = handle.read().await;
        assert_eq!(game.phase, Phase::Pregame);
        assert_eq!(game.alive_count, 4);
        let missing = game.player(5).unwrap().elimination.unwrap();
        assert_eq!(missing.reason, EliminationReason::NoCheckin);
        assert_eq!(missing.eliminator, None);
        assert!(missing.confirmed);
        drop(game);

        h.set_time(2_000 + rules.checkin_secs + rules.pregame_secs);
        h.engine.sweep().await;
        let game = handle.read().await;
        assert_eq!(game.phase, Phase::Hunting);
        let ring: BTreeSet<_> = game.players.values().filter_map(|p| p.target).collect();
        assert_eq!(ring, BTreeSet::from([1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_finished_games_evicted_after_grace() {
        let h = Harness::new();
        let game_id = h.default_game(1);
        h.engine.backfill().await.unwrap();
        let handle = h.engine.registry().get(game_id).await.unwrap();
        h.engine.mutate(&handle, |g, now| g.cancel(now)).await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let (kick_tx, kick_rx) = tokio::sync::oneshot::channel();
        h.engine.hub().subscribe(game_id, None, tx, Some(kick_tx));

        assert_eq!(h.engine.sweep().await.evicted, 0);
        h.set_time(100 + h.engine.config().eviction_grace_secs);
        assert_eq!(h.engine.sweep().await.evicted, 1);
        assert!(h.engine.registry().get(game_id).await.is_none());
        assert_eq!(h.engine.hub().subscriber_count(game_id), 0);
        assert_eq!(kick_rx.await, Ok(Kick::GameClosed));
        assert!(rx.recv().await.is_none());
        assert!(h.storage.load_game(game_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_via_sweep() {
        let h = Harness::new();
        let game_id = h.default_game(3);
        h.engine.backfill().await.unwrap();
        h.set_time(2_000);
        h.chain.execute(LedgerCall::StartGame { game_id }).unwrap();
        h.engine.backfill().await.unwrap();
        let handle = h.engine.registry().get(game_id).await.unwrap();
        let rules = h.engine.config().rules;
        for n in 1..=3 {
            h.engine.mutate(&handle, |g, now| g.check_in(Some(n), None, now, &rules)).await.unwrap();
        }
        let hunting_at = 2_000 + rules.checkin_secs + rules.pregame_secs;
        h.set_time(hunting_at);
        h.engine.sweep().await;

        h.set_time(hunting_at + 10);
        h.engine.mutate(&handle, |g, now| g.submit_heartbeat(1, 2, now, rules.heartbeat_interval_secs)).await.unwrap();
        h.engine.mutate(&handle, |g, now| g.submit_heartbeat(2, 1, now, rules.heartbeat_interval_secs)).await.unwrap();

        h.set_time(hunting_at + rules.heartbeat_interval_secs + 1);
        h.engine.sweep().await;
        let game = handle.read().await;
        let dead = game.player(3).unwrap().elimination.unwrap();
        assert_eq!(dead.reason, EliminationReason::HeartbeatTimeout);
        assert_eq!(game.alive_count, 2);
        assert_eq!(game.player(1).unwrap().target, Some(2));
        assert!(game.player_by_address(&addr(3)).is_some());
    }
}
