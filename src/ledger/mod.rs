//! Ledger Module
//!
//! Everything that talks to the game contract.
//!
//! ## Module Structure
//!
//! - `events`: Contract events, log envelope, cursor
//! - `client`: RPC trait, retrying client, contract calls
//! - `memory`: In-process contract for development and tests

pub mod events;
pub mod client;
pub mod memory;

pub use events::{EventKey, LedgerCursor, LedgerEvent, LedgerLog, LedgerWinners};
pub use client::{ChainRpc, LedgerCall, LedgerClient, LedgerError, RetryPolicy, RpcError};
pub use memory::MemoryChain;
