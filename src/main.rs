//! Chain Assassin Game Server
//!
//! Runs the orchestration engine against the in-process ledger and serves
//! the WebSocket gateway until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chain_assassin::{
    config::AppConfig,
    core::{Clock, GeoPoint, SystemClock},
    engine::Engine,
    game::state::{GameConfig, PrizeSplit, ShrinkStep, Timestamp},
    ledger::{ChainRpc, LedgerCall, LedgerClient, MemoryChain},
    network::{GameServer, Hub},
    storage::{FileStore, Storage},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!("Chain Assassin Server v{}", VERSION);

    let store = FileStore::open(&config.store.data_dir)
        .await
        .with_context(|| format!("cannot open data directory {}", config.store.data_dir.display()))?;
    let storage = Storage::new(Arc::new(store));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
    let chain = Arc::new(MemoryChain::new(config.engine.operator, clock.now()));
    warn!("Using the in-process ledger; state on it is lost at exit");
    if let Some(players) = demo_players() {
        seed_demo(&chain, clock.now(), players);
    }

    let ledger = LedgerClient::new(chain.clone() as Arc<dyn ChainRpc>, config.engine.retry);
    let engine = Arc::new(Engine::new(
        config.engine.clone(),
        ledger,
        storage,
        Arc::new(Hub::new()),
        clock.clone(),
    ));

    let restored = engine.restore().await.context("cannot load persisted games")?;
    let applied = engine.backfill().await.context("initial backfill failed")?;
    let repaired = engine.verify_loaded().await.context("cannot verify games against ledger")?;
    info!(restored, applied, repaired, "Engine ready");

    let server = Arc::new(GameServer::new(config.server.clone(), config.auth.clone(), engine.clone()));

    let live = {
        let engine = engine.clone();
        let shutdown = server.shutdown_signal();
        tokio::spawn(async move { engine.run_live(shutdown).await })
    };
    let timers = {
        let engine = engine.clone();
        let shutdown = server.shutdown_signal();
        tokio::spawn(async move { engine.run_timers(shutdown).await })
    };
    let block_time = {
        let chain = chain.clone();
        let clock = clock.clone();
        let period = config.engine.sweep_interval;
        let mut shutdown = server.shutdown_signal();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => chain.set_time(clock.now()),
                    _ = shutdown.recv() => break,
                }
            }
        })
    };
    let gateway = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("cannot listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
        }
        result = gateway => {
            server.shutdown();
            result.context("gateway task panicked")?.context("gateway failed")?;
        }
    }

    server.shutdown();
    let _ = tokio::join!(live, timers, block_time);
    engine.checkpoint().await.context("cannot checkpoint ledger cursor")?;
    info!("Shutdown complete");
    Ok(())
}

/// Players to register in a demo game, from `CA_DEMO_PLAYERS`.
fn demo_players() -> Option<u8> {
    let raw = std::env::var("CA_DEMO_PLAYERS").ok()?;
    match raw.trim().parse::<u8>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(value = %raw, "Ignoring CA_DEMO_PLAYERS");
            None
        }
    }
}

/// Create a demo game on the in-process ledger and register `players`.
///
/// Registration closes after a minute and the game starts a minute later.
fn seed_demo(chain: &MemoryChain, now: Timestamp, players: u8) {
    let center = GeoPoint::new(40_748_400, -73_985_700);
    let config = GameConfig {
        title: "Demo Hunt".to_string(),
        entry_fee: 1_000,
        min_players: 2,
        max_players: u32::from(players).max(2),
        registration_deadline: now + 60,
        game_start_time: now + 120,
        max_duration_secs: 3_600,
        creator: chain.operator(),
        zone_center: center,
        meeting_point: center,
        prize_split: PrizeSplit {
            first_bps: 4_000,
            second_bps: 2_000,
            third_bps: 1_000,
            kills_bps: 1_500,
            creator_bps: 500,
        },
        shrink_schedule: vec![
            ShrinkStep::new(0, 800),
            ShrinkStep::new(600, 400),
            ShrinkStep::new(1_200, 150),
        ],
    };
    let game_id = match chain.execute(LedgerCall::CreateGame { config }) {
        Ok(receipt) => receipt.value as u64,
        Err(e) => {
            warn!(error = %e, "Demo game not created");
            return;
        }
    };
    for i in 1..=players {
        let mut bytes = [0u8; 20];
        bytes[19] = i;
        let player = chain_assassin::Address::new(bytes);
        if let Err(e) = chain.execute(LedgerCall::Register { game_id, player, value: 1_000 }) {
            warn!(game_id, player = %player.to_hex(), error = %e, "Demo registration failed");
        }
    }
    info!(game_id, players, "Seeded demo game");
}
