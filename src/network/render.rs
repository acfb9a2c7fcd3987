//! Event Rendering
//!
//! Turns game events into wire messages. Runs under the game's write lock
//! right after the mutation, so the game passed in is the post-mutation state.

use crate::game::events::{Audience, GameEvent};
use crate::game::state::{Game, Phase, PlayerNumber};
use crate::network::protocol::{
    AuthSuccess, CheckinStarted, CheckinUpdate, GameCancelled, GameEnded, GameStarted,
    GameStartedBroadcast, HeartbeatRefreshed, HeartbeatScanSuccess, HunterUpdated, KillRecorded,
    LeaderboardEntry, LeaderboardUpdate, PlayerEliminated, PlayerRegistered, PregameStarted,
    ServerMessage, TargetAssigned, TargetInfo, ZoneInfo, ZoneShrink, ZoneWarning,
};

/// Messages for a batch of events, in event order.
///
/// Repeated leaderboard changes in one batch collapse into a single update at
/// the position of the last one.
pub fn render_events(game: &Game, events: &[GameEvent]) -> Vec<(Audience, ServerMessage)> {
    let last_leaderboard = events.iter().rposition(|e| matches!(e, GameEvent::LeaderboardChanged));
    let mut out = Vec::new();
    for (i, event) in events.iter().enumerate() {
        if matches!(event, GameEvent::LeaderboardChanged) && Some(i) != last_leaderboard {
            continue;
        }
        render_event(game, event, &mut out);
    }
    out
}

fn target_info(game: &Game, number: PlayerNumber) -> Option<TargetInfo> {
    game.player(number).map(|p| TargetInfo {
        player_number: p.number,
        address: p.address.to_hex(),
    })
}

/// Current standings.
pub fn leaderboard(game: &Game) -> ServerMessage {
    ServerMessage::LeaderboardUpdate(LeaderboardUpdate {
        entries: game
            .leaderboard()
            .into_iter()
            .map(|row| LeaderboardEntry {
                player_number: row.player_number,
                kills: row.kills,
                is_alive: row.is_alive,
                eliminated_at: row.eliminated_at,
            })
            .collect(),
    })
}

/// Snapshot sent to a player right after authentication.
pub fn auth_success(game: &Game, number: PlayerNumber) -> Option<ServerMessage> {
    let player = game.player(number)?;
    let hunting = player.alive && game.phase == Phase::Hunting;
    Some(ServerMessage::AuthSuccess(AuthSuccess {
        game_id: game.id,
        player_number: number,
        is_alive: player.alive,
        kills: player.kills,
        target: player.target.filter(|_| hunting).and_then(|t| target_info(game, t)),
        hunter_player_number: player.hunter.filter(|_| hunting),
        last_heartbeat_at: player.last_heartbeat_at,
        sub_phase: game.phase.sub_phase().map(str::to_string),
        checkin_ends_at: game.deadlines.checkin,
        pregame_ends_at: game.deadlines.pregame,
    }))
}

fn render_event(game: &Game, event: &GameEvent, out: &mut Vec<(Audience, ServerMessage)>) {
    let audience = event.audience();
    let message = match *event {
        GameEvent::PlayerRegistered { player, player_count } => {
            ServerMessage::PlayerRegistered(PlayerRegistered { player_number: player, player_count })
        }
        GameEvent::CheckinStarted { ends_at, duration_secs } => ServerMessage::CheckinStarted(CheckinStarted {
            checkin_duration_seconds: duration_secs,
            checkin_ends_at: ends_at,
        }),
        GameEvent::CheckedIn { player, checked_in_count, player_count } => {
            ServerMessage::CheckinUpdate(CheckinUpdate {
                checked_in_count,
                total_players: player_count,
                player_number: player,
            })
        }
        GameEvent::PregameStarted { ends_at, duration_secs, checked_in_count, player_count } => {
            ServerMessage::PregameStarted(PregameStarted {
                pregame_duration_seconds: duration_secs,
                pregame_ends_at: ends_at,
                checked_in_count,
                player_count,
            })
        }
        GameEvent::HuntingStarted { heartbeat_interval_secs, .. } => {
            let zone = ZoneInfo::from(&game.zone);
            for player in game.players.values().filter(|p| p.alive) {
                let started = GameStarted {
                    target: player.target.and_then(|t| target_info(game, t)),
                    hunter_player_number: player.hunter,
                    heartbeat_deadline: player.heartbeat_deadline,
                    heartbeat_interval_seconds: heartbeat_interval_secs,
                    zone: Some(zone.clone()),
                };
                out.push((Audience::Player(player.number), ServerMessage::GameStarted(started)));
            }
            ServerMessage::GameStartedBroadcast(GameStartedBroadcast { player_count: game.alive_count })
        }
        GameEvent::TargetAssigned { hunter, target } => {
            let Some(target) = target_info(game, target) else {
                return;
            };
            ServerMessage::TargetAssigned(TargetAssigned {
                target,
                hunter_player_number: game.player(hunter).and_then(|p| p.hunter),
            })
        }
        GameEvent::HunterUpdated { hunter, .. } => {
            ServerMessage::HunterUpdated(HunterUpdated { hunter_player_number: hunter })
        }
        GameEvent::KillRecorded { hunter, target, hunter_kills } => ServerMessage::KillRecorded(KillRecorded {
            hunter_number: hunter,
            target_number: target,
            hunter_kills,
        }),
        GameEvent::PlayerEliminated { player, eliminator, reason } => {
            ServerMessage::PlayerEliminated(PlayerEliminated {
                player_number: player,
                eliminator_number: eliminator,
                reason: reason.as_str().to_string(),
            })
        }
        GameEvent::ZoneShrunk { .. } => ServerMessage::ZoneShrink(ZoneShrink { zone: ZoneInfo::from(&game.zone) }),
        GameEvent::ZoneWarning { seconds_remaining, .. } => ServerMessage::ZoneWarning(ZoneWarning {
            seconds_remaining,
            in_zone: false,
        }),
        GameEvent::HeartbeatRefreshed { until, .. } => {
            ServerMessage::HeartbeatRefreshed(HeartbeatRefreshed { refreshed_until: until })
        }
        GameEvent::HeartbeatScanned { scanned, .. } => {
            ServerMessage::HeartbeatScanSuccess(HeartbeatScanSuccess { scanned_player_number: scanned })
        }
        GameEvent::LeaderboardChanged => leaderboard(game),
        GameEvent::GameEnded { winners } => ServerMessage::GameEnded(GameEnded {
            winner1: winners.first,
            winner2: winners.second,
            winner3: winners.third,
            top_killer: winners.top_killer,
        }),
        GameEvent::GameCancelled => ServerMessage::GameCancelled(GameCancelled { game_id: game.id }),
    };
    out.push((audience, message));
}
