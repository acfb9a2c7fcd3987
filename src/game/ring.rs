//! Target Ring
//!
//! During the hunt every alive player hunts exactly one other alive player and
//! is hunted by exactly one, forming a single cycle. Links are player numbers
//! into the game's player map.
//!
//! ## Repair
//!
//! When a player leaves the cycle (kill, zone, heartbeat) their hunter takes
//! over their target:
//!
//! ```text
//!   H -> V -> T      becomes      H -> T
//! ```
//!
//! With two players left the survivor ends up hunting itself, which is the
//! terminal shape of the ring.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::rng::DeterministicRng;
use crate::game::state::{Game, GameId, Phase, Player, PlayerNumber};

// =============================================================================
// KILL ADJUDICATION
// =============================================================================

/// Why a kill claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KillRejection {
    /// Game is not in the hunting phase.
    #[error("kills are only accepted while hunting")]
    NotHunting,

    /// Claimer or target is not in this game.
    #[error("player is not registered in this game")]
    NotRegistered,

    /// Claimer named themselves.
    #[error("cannot kill yourself")]
    SelfKill,

    /// Claimer or target already eliminated.
    #[error("player is not alive")]
    NotAlive,

    /// Target is not the claimer's current target.
    #[error("that player is not your target")]
    WrongTarget,
}

impl KillRejection {
    /// Stable client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            KillRejection::NotHunting => "not-hunting",
            KillRejection::NotRegistered => "not-registered",
            KillRejection::SelfKill => "self-kill",
            KillRejection::NotAlive => "not-alive",
            KillRejection::WrongTarget => "wrong-target",
        }
    }
}

impl Game {
    /// Validate a kill claim without mutating anything.
    pub fn adjudicate_kill(
        &self,
        hunter: Option<PlayerNumber>,
        target: PlayerNumber,
    ) -> Result<(), KillRejection> {
        if self.phase != Phase::Hunting {
            return Err(KillRejection::NotHunting);
        }
        let hunter = hunter
            .and_then(|n| self.players.get(&n))
            .ok_or(KillRejection::NotRegistered)?;
        if hunter.number == target {
            return Err(KillRejection::SelfKill);
        }
        let victim = self.players.get(&target).ok_or(KillRejection::NotRegistered)?;
        if !hunter.alive || !victim.alive {
            return Err(KillRejection::NotAlive);
        }
        if hunter.target != Some(target) {
            return Err(KillRejection::WrongTarget);
        }
        Ok(())
    }

    /// Build the ring over currently alive players.
    ///
    /// Returns `(hunter, target)` pairs in hunter order.
    pub fn build_ring(&mut self) -> Vec<(PlayerNumber, PlayerNumber)> {
        let order = ring_order(self.id, &self.alive_numbers());
        assign_ring(&mut self.players, &order)
    }
}

// =============================================================================
// RING CONSTRUCTION
// =============================================================================

/// Reproducible cycle order for a game.
///
/// `alive` must be in ascending order; the shuffle is seeded from the game id
/// only, so the same roster always yields the same ring.
pub fn ring_order(game_id: GameId, alive: &[PlayerNumber]) -> Vec<PlayerNumber> {
    let mut order = alive.to_vec();
    let mut rng = DeterministicRng::for_game(game_id);
    rng.shuffle(&mut order);
    order
}

/// Link players in `order` into a cycle.
pub fn assign_ring(
    players: &mut BTreeMap<PlayerNumber, Player>,
    order: &[PlayerNumber],
) -> Vec<(PlayerNumber, PlayerNumber)> {
    let n = order.len();
    let mut pairs = Vec::with_capacity(n);
    for (i, &hunter) in order.iter().enumerate() {
        let target = order[(i + 1) % n];
        let prev = order[(i + n - 1) % n];
        if let Some(p) = players.get_mut(&hunter) {
            p.target = Some(target);
            p.hunter = Some(prev);
        }
        pairs.push((hunter, target));
    }
    pairs.sort_unstable();
    pairs
}

/// Result of removing a player from the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingRepair {
    /// Victim's hunter, now owning the victim's target.
    pub hunter: PlayerNumber,
    /// New target of `hunter`.
    pub new_target: PlayerNumber,
}

/// Remove `victim` from the ring, linking its hunter to its target.
///
/// Returns `None` if the victim had no ring links or hunted itself.
pub fn splice_out(
    players: &mut BTreeMap<PlayerNumber, Player>,
    victim: PlayerNumber,
) -> Option<RingRepair> {
    let v = players.get_mut(&victim)?;
    let hunter = v.hunter.take()?;
    let target = v.target.take()?;
    if hunter == victim {
        return None;
    }

    players.get_mut(&hunter)?.target = Some(target);
    players.get_mut(&target)?.hunter = Some(hunter);

    Some(RingRepair { hunter, new_target: target })
}

// =============================================================================
// INVARIANT
// =============================================================================

/// Ways the ring can be broken.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingViolation {
    /// Alive player without a target.
    #[error("player #{0} has no target")]
    MissingTarget(PlayerNumber),

    /// Link points at a dead or unknown player.
    #[error("player #{0} targets a player outside the ring")]
    DanglingLink(PlayerNumber),

    /// Hunter back-link does not match.
    #[error("player #{0} hunter link is inconsistent")]
    HunterMismatch(PlayerNumber),

    /// Walk from the first player does not cover everyone.
    #[error("ring covers {covered} of {alive} players")]
    MultipleCycles { covered: usize, alive: usize },
}

/// Check the alive players form exactly one cycle with consistent back-links.
pub fn check_single_cycle(players: &BTreeMap<PlayerNumber, Player>) -> Result<(), RingViolation> {
    let alive: BTreeSet<PlayerNumber> = players.values().filter(|p| p.alive).map(|p| p.number).collect();
    let Some(&start) = alive.iter().next() else {
        return Ok(());
    };

    for &n in &alive {
        let p = &players[&n];
        let target = p.target.ok_or(RingViolation::MissingTarget(n))?;
        if !alive.contains(&target) {
            return Err(RingViolation::DanglingLink(n));
        }
        if players[&target].hunter != Some(n) {
            return Err(RingViolation::HunterMismatch(target));
        }
    }

    let mut seen = BTreeSet::new();
    let mut current = start;
    while seen.insert(current) {
        current = players[&current].target.ok_or(RingViolation::MissingTarget(current))?;
    }
    if seen.len() != alive.len() {
        return Err(RingViolation::MultipleCycles { covered: seen.len(), alive: alive.len() });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::EliminationReason;
    use crate::game::state::fixtures::game_with_players;
    use proptest::prelude::*;

    fn hunting_game(id: GameId, n: u8) -> Game {
        let mut game = game_with_players(id, n);
        game.phase = Phase::Hunting;
        game.build_ring();
        game
    }

    #[test]
    fn test_ring_is_single_cycle_without_fixed_points() {
        for n in 2..=12 {
            let game = hunting_game(42, n);
            check_single_cycle(&game.players).unwrap();
            for p in game.players.values() {
                assert_ne!(p.target, Some(p.number));
            }
        }
    }

    #[test]
    fn test_ring_is_reproducible() {
        let a = hunting_game(7, 8);
        let b = hunting_game(7, 8);
        let targets = |g: &Game| g.players.values().map(|p| p.target).collect::<Vec<_>>();
        assert_eq!(targets(&a), targets(&b));
    }

    #[test]
    fn test_kill_inherits_target() {
        let mut game = hunting_game(3, 5);
        let hunter = 1;
        let victim = game.player(hunter).unwrap().target.unwrap();
        let inherited = game.player(victim).unwrap().target.unwrap();

        game.adjudicate_kill(Some(hunter), victim).unwrap();
        let events = game.record_kill(hunter, victim, 100).unwrap();

        assert_eq!(game.player(hunter).unwrap().target, Some(inherited));
        assert_eq!(game.player(hunter).unwrap().kills, 1);
        assert!(!game.player(victim).unwrap().alive);
        assert!(events.iter().any(|e| matches!(e, crate::game::events::GameEvent::TargetAssigned { hunter: 1, .. })));
        check_single_cycle(&game.players).unwrap();
    }

    #[test]
    fn test_two_players_collapse_to_self_reference() {
        let mut game = hunting_game(5, 2);
        let victim = game.player(1).unwrap().target.unwrap();
        assert_eq!(victim, 2);
        game.record_kill(1, 2, 10).unwrap();

        let survivor = game.player(1).unwrap();
        assert_eq!(survivor.target, Some(1));
        assert_eq!(survivor.hunter, Some(1));
        assert_eq!(game.alive_count, 1);
        assert_eq!(game.compute_winners().first, Some(1));
    }

    #[test]
    fn test_kill_rejections() {
        let mut game = hunting_game(11, 4);
        let target_of_1 = game.player(1).unwrap().target.unwrap();
        let other = (2..=4).find(|n| *n != target_of_1).unwrap();

        assert_eq!(game.adjudicate_kill(Some(1), 1), Err(KillRejection::SelfKill));
        assert_eq!(game.adjudicate_kill(None, 2), Err(KillRejection::NotRegistered));
        assert_eq!(game.adjudicate_kill(Some(1), 99), Err(KillRejection::NotRegistered));
        assert_eq!(game.adjudicate_kill(Some(1), other), Err(KillRejection::WrongTarget));

        game.eliminate(target_of_1, EliminationReason::Zone, None, 5, false).unwrap();
        assert_eq!(game.adjudicate_kill(Some(1), target_of_1), Err(KillRejection::NotAlive));

        game.phase = Phase::Pregame;
        assert_eq!(game.adjudicate_kill(Some(1), 2), Err(KillRejection::NotHunting));
    }

    #[test]
    fn test_rejected_kill_does_not_mutate() {
        let game = hunting_game(13, 4);
        let before = game.compute_hash();
        let _ = game.adjudicate_kill(Some(1), 1);
        assert_eq!(game.compute_hash(), before);
    }

    proptest! {
        #[test]
        fn test_ring_survives_any_elimination_order(
            n in 2u8..24,
            seed in any::<u64>(),
            picks in proptest::collection::vec(any::<u32>(), 0..24),
        ) {
            let mut game = hunting_game(seed, n);
            prop_assert!(check_single_cycle(&game.players).is_ok());

            for (i, pick) in picks.iter().enumerate() {
                let alive = game.alive_numbers();
                if alive.len() <= 1 {
                    break;
                }
                let victim = alive[*pick as usize % alive.len()];
                if i % 2 == 0 {
                    let hunter = game.player(victim).unwrap().hunter.unwrap();
                    prop_assert!(game.adjudicate_kill(Some(hunter), victim).is_ok());
                    game.record_kill(hunter, victim, i as u64).unwrap();
                } else {
                    game.eliminate(victim, EliminationReason::HeartbeatTimeout, None, i as u64, false).unwrap();
                }
                prop_assert!(check_single_cycle(&game.players).is_ok());
                prop_assert_eq!(game.alive_count as usize, game.alive_numbers().len());
            }
        }
    }
}
