//! Wall Clock
//!
//! Game deadlines are unix seconds because the ledger stamps events that way.
//! The system clock anchors once to wall time and then advances by a
//! monotonic `Instant`, so a wall-clock step cannot move deadlines backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::game::state::Timestamp;

/// Source of the current time in unix seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall time at construction plus monotonic elapsed time.
#[derive(Debug)]
pub struct SystemClock {
    anchor_secs: Timestamp,
    anchor: Instant,
}

impl SystemClock {
    /// Anchor to the current wall time.
    pub fn new() -> Self {
        Self {
            anchor_secs: chrono::Utc::now().timestamp().max(0) as Timestamp,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.anchor_secs + self.anchor.elapsed().as_secs()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self(AtomicU64::new(now))
    }

    /// Jump to `now`.
    pub fn set(&self, now: Timestamp) {
        self.0.store(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a > 1_600_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(50);
        assert_eq!(clock.now(), 50);
    }
}
