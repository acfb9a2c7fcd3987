//! Ledger Events
//!
//! The seven contract events and the envelope the indexer wraps them in.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::game::state::{Address, EliminationReason, Game, GameConfig, GameId, Timestamp, Winners};

/// Position of a log on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventKey {
    /// Block number.
    pub block: u64,
    /// Index of the log within its block.
    pub log_index: u32,
}

impl EventKey {
    /// Create a key.
    pub const fn new(block: u64, log_index: u32) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// Final standings as the contract stores them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerWinners {
    /// First place.
    pub first: Option<Address>,
    /// Second place.
    pub second: Option<Address>,
    /// Third place.
    pub third: Option<Address>,
    /// Top killer.
    pub top_killer: Option<Address>,
}

impl LedgerWinners {
    /// Resolve player numbers of a game to addresses.
    pub fn from_numbers(game: &Game, winners: &Winners) -> Self {
        let addr = |n: Option<u32>| n.and_then(|n| game.player(n)).map(|p| p.address);
        Self {
            first: addr(winners.first),
            second: addr(winners.second),
            third: addr(winners.third),
            top_killer: addr(winners.top_killer),
        }
    }

    /// Resolve addresses back to player numbers.
    pub fn to_numbers(&self, game: &Game) -> Winners {
        let number = |a: Option<Address>| a.and_then(|a| game.number_of(&a));
        Winners {
            first: number(self.first),
            second: number(self.second),
            third: number(self.third),
            top_killer: number(self.top_killer),
        }
    }
}

/// Contract event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// New game with its immutable configuration.
    GameCreated {
        game_id: GameId,
        config: GameConfig,
    },

    /// Paid registration.
    PlayerRegistered {
        game_id: GameId,
        player: Address,
        player_number: u32,
    },

    /// Game moved to active.
    GameStarted {
        game_id: GameId,
    },

    /// Non-kill elimination recorded by the operator.
    PlayerEliminated {
        game_id: GameId,
        player: Address,
        eliminator: Option<Address>,
        reason: EliminationReason,
    },

    /// Kill recorded; implies the target's elimination.
    KillRecorded {
        game_id: GameId,
        hunter: Address,
        target: Address,
    },

    /// Final standings recorded.
    GameEnded {
        game_id: GameId,
        winners: LedgerWinners,
    },

    /// Cancelled (too few players or expired).
    GameCancelled {
        game_id: GameId,
    },
}

impl LedgerEvent {
    /// Game this event belongs to.
    pub fn game_id(&self) -> GameId {
        match self {
            LedgerEvent::GameCreated { game_id, .. }
            | LedgerEvent::PlayerRegistered { game_id, .. }
            | LedgerEvent::GameStarted { game_id }
            | LedgerEvent::PlayerEliminated { game_id, .. }
            | LedgerEvent::KillRecorded { game_id, .. }
            | LedgerEvent::GameEnded { game_id, .. }
            | LedgerEvent::GameCancelled { game_id } => *game_id,
        }
    }

    /// Event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::GameCreated { .. } => "GameCreated",
            LedgerEvent::PlayerRegistered { .. } => "PlayerRegistered",
            LedgerEvent::GameStarted { .. } => "GameStarted",
            LedgerEvent::PlayerEliminated { .. } => "PlayerEliminated",
            LedgerEvent::KillRecorded { .. } => "KillRecorded",
            LedgerEvent::GameEnded { .. } => "GameEnded",
            LedgerEvent::GameCancelled { .. } => "GameCancelled",
        }
    }
}

/// An event as delivered by the indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLog {
    /// Chain position.
    pub key: EventKey,
    /// Contiguous global sequence number, starting at 1.
    pub sequence: u64,
    /// Block timestamp.
    pub timestamp: Timestamp,
    /// Payload.
    pub event: LedgerEvent,
}

/// Last fully processed log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerCursor {
    /// Chain position of the last log.
    pub key: EventKey,
    /// Sequence of the last log, 0 before anything was processed.
    pub sequence: u64,
}

impl LedgerCursor {
    /// Cursor pointing at `log`.
    pub fn at(log: &LedgerLog) -> Self {
        Self { key: log.key, sequence: log.sequence }
    }

    /// Whether `log` is at or before this cursor.
    pub fn covers(&self, log: &LedgerLog) -> bool {
        log.sequence <= self.sequence
    }

    /// Whether `log` would leave a hole after this cursor.
    pub fn has_gap_before(&self, log: &LedgerLog) -> bool {
        log.sequence > self.sequence + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::fixtures::game_with_players;

    fn log(sequence: u64) -> LedgerLog {
        LedgerLog {
            key: EventKey::new(sequence, 0),
            sequence,
            timestamp: 0,
            event: LedgerEvent::GameStarted { game_id: 1 },
        }
    }

    #[test]
    fn test_event_key_order() {
        assert!(EventKey::new(1, 5) < EventKey::new(2, 0));
        assert!(EventKey::new(2, 0) < EventKey::new(2, 1));
        assert_eq!(EventKey::new(3, 4).to_string(), "3:4");
    }

    #[test]
    fn test_cursor_gap_detection() {
        let cursor = LedgerCursor::at(&log(5));
        assert!(cursor.covers(&log(5)));
        assert!(cursor.covers(&log(2)));
        assert!(!cursor.has_gap_before(&log(6)));
        assert!(cursor.has_gap_before(&log(7)));
        assert!(LedgerCursor::default().has_gap_before(&log(2)));
    }

    #[test]
    fn test_winners_address_mapping() {
        let game = game_with_players(1, 3);
        let winners = Winners { first: Some(2), second: Some(3), third: None, top_killer: Some(2) };
        let on_chain = LedgerWinners::from_numbers(&game, &winners);
        assert_eq!(on_chain.first, Some(game.player(2).unwrap().address));
        assert_eq!(on_chain.to_numbers(&game), winners);
    }
}
