//! Configuration
//!
//! Every section has sensible defaults and can be overridden from the
//! environment. Parsing goes through a lookup function so tests can supply
//! variables without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::phase::GameRules;
use crate::game::state::Address;
use crate::ledger::client::RetryPolicy;
use crate::network::auth::AuthConfig;
use crate::network::server::ServerConfig;

/// A variable that is set but unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    /// Variable name.
    pub var: &'static str,
    /// Raw value.
    pub value: String,
    /// What was expected.
    pub reason: String,
}

/// Parse `var` if present, else keep `current`.
pub(crate) fn parse_var<T, L>(lookup: &L, var: &'static str, current: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError { var, reason: e.to_string(), value }),
        },
        None => Ok(current),
    }
}

pub(crate) fn parse_secs<L>(lookup: &L, var: &'static str, current: Duration) -> Result<Duration, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    parse_var(lookup, var, current.as_secs()).map(Duration::from_secs)
}

pub(crate) fn parse_millis<L>(lookup: &L, var: &'static str, current: Duration) -> Result<Duration, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    parse_var(lookup, var, current.as_millis() as u64).map(Duration::from_millis)
}

pub(crate) fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

// =============================================================================
// ENGINE
// =============================================================================

/// Orchestration engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Gameplay timings and radii.
    pub rules: GameRules,
    /// Timer sweep period.
    pub sweep_interval: Duration,
    /// How long a finished game stays loaded.
    pub eviction_grace_secs: u64,
    /// Delay before resubmitting an unreconciled ledger call.
    pub resubmit_secs: u64,
    /// Logs fetched per backfill page.
    pub backfill_batch: usize,
    /// Ledger RPC retries.
    pub retry: RetryPolicy,
    /// Address the server submits operator calls from.
    pub operator: Address,
    /// Pause before resubscribing after the live stream closes.
    pub resubscribe_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: GameRules::default(),
            sweep_interval: Duration::from_secs(1),
            eviction_grace_secs: 3600,
            resubmit_secs: 30,
            backfill_batch: 500,
            retry: RetryPolicy::default(),
            operator: Address([0u8; 20]),
            resubscribe_delay: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Defaults overridden by `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let rules = GameRules {
            checkin_secs: parse_var(&lookup, "CA_CHECKIN_SECS", d.rules.checkin_secs)?,
            pregame_secs: parse_var(&lookup, "CA_PREGAME_SECS", d.rules.pregame_secs)?,
            heartbeat_interval_secs: parse_var(&lookup, "CA_HEARTBEAT_INTERVAL_SECS", d.rules.heartbeat_interval_secs)?,
            zone_grace_secs: parse_var(&lookup, "CA_ZONE_GRACE_SECS", d.rules.zone_grace_secs)?,
            checkin_radius_m: parse_var(&lookup, "CA_CHECKIN_RADIUS_M", d.rules.checkin_radius_m)?,
        };
        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "CA_RPC_MAX_ATTEMPTS", d.retry.max_attempts)?,
            initial_backoff: parse_millis(&lookup, "CA_RPC_INITIAL_BACKOFF_MS", d.retry.initial_backoff)?,
            max_backoff: parse_millis(&lookup, "CA_RPC_MAX_BACKOFF_MS", d.retry.max_backoff)?,
        };
        let operator = match lookup("CA_OPERATOR_ADDRESS") {
            Some(value) => Address::from_hex(value.trim()).ok_or_else(|| ConfigError {
                var: "CA_OPERATOR_ADDRESS",
                value,
                reason: "expected 0x-prefixed 20-byte hex".to_string(),
            })?,
            None => d.operator,
        };
        let backfill_batch = parse_var(&lookup, "CA_BACKFILL_BATCH", d.backfill_batch)?;
        if backfill_batch == 0 {
            return Err(ConfigError {
                var: "CA_BACKFILL_BATCH",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            rules,
            sweep_interval: parse_millis(&lookup, "CA_SWEEP_INTERVAL_MS", d.sweep_interval)?,
            eviction_grace_secs: parse_var(&lookup, "CA_EVICTION_GRACE_SECS", d.eviction_grace_secs)?,
            resubmit_secs: parse_var(&lookup, "CA_RESUBMIT_SECS", d.resubmit_secs)?,
            backfill_batch,
            retry,
            operator,
            resubscribe_delay: parse_millis(&lookup, "CA_RESUBSCRIBE_DELAY_MS", d.resubscribe_delay)?,
        })
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one file per record.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl StoreConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Defaults overridden by `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        lookup("CA_DATA_DIR")
            .map(|dir| Self { data_dir: PathBuf::from(dir) })
            .unwrap_or_default()
    }
}

// =============================================================================
// WHOLE APPLICATION
// =============================================================================

/// All sections together.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// WebSocket gateway.
    pub server: ServerConfig,
    /// Orchestration engine.
    pub engine: EngineConfig,
    /// Storage backend.
    pub store: StoreConfig,
    /// Token validation.
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load every section from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Load every section from `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            engine: EngineConfig::from_lookup(&lookup)?,
            store: StoreConfig::from_lookup(&lookup),
            auth: AuthConfig::from_lookup(&lookup)?,
        })
    }
}
