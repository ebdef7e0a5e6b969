// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) DUSK NETWORK. All rights reserved.

use std::fmt::Formatter;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use privacy_data::ledger::{format_amount, Amount, COIN};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::instantsend::quorum::Threshold;

/// Allowed range of mixing rounds.
pub const MIN_ROUNDS: u32 = 2;
pub const MAX_ROUNDS: u32 = 16;
pub const DEFAULT_ROUNDS: u32 = 2;

/// Anonymized value the wallet keeps available by default.
pub const DEFAULT_KEEP_AMOUNT: Amount = 1000 * COIN;

/// Outputs below this value are never created nor denominated.
pub const DUST_FLOOR: Amount = 5460;

/// Cap of outputs of the same denomination in a single creation tx.
pub const MAX_DENOMINATION_OUTPUTS: usize = 11;

/// Keys left in the keypool below which a backup is required.
pub const MIN_KEYS_LEFT: u32 = 100;

pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Per-stage session deadlines.
pub const QUEUE_ACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENTRY_COLLECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(15);
pub const SIGN_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_REQUEUES: u32 = 1;

/// Pool sizes.
pub const POOL_TARGET_SIZE: usize = 3;
pub const POOL_MIN_SIZE: usize = 2;

pub const MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF: Duration = Duration::from_secs(5);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub const MIN_PROTOCOL_VERSION: u32 = 70212;
pub const MAX_LAST_SEEN: Duration = Duration::from_secs(60 * 60);
pub const MAX_QUEUE_OCCUPANCY: u32 = 3;
pub const RECENTLY_USED_CAP: usize = 8;

pub const COLLATERAL_FEE: Amount = COIN / 1000;
pub const COLLATERAL_MAX_MULTIPLIER: u64 = 4;
pub const COLLATERAL_USED_TTL: Duration = Duration::from_secs(10 * 60);

pub const LOCK_MAX_VALUE: Amount = 1000 * COIN;
pub const LOCK_MAX_INPUTS: usize = 32;
pub const LOCK_MIN_CONFIRMATIONS: u32 = 6;
pub const LOCK_THRESHOLD: Threshold = Threshold::Fixed(6);
pub const LOCK_EXPIRY: Duration = Duration::from_secs(15);
pub const KEEP_LOCK_BLOCKS: u64 = 24;

/// Capacity of the inbound queue of a single session task.
pub const SESSION_QUEUE_CAP: usize = 64;
/// Capacity of the status event channels.
pub const EVENTS_CAP: usize = 256;

/// Default log_level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log_type.
const DEFAULT_LOG_TYPE: &str = "coloured";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Params {
    pub log_level: String,
    pub log_type: String,
    pub privatesend: PrivateSendParams,
    pub instantsend: InstantSendParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.into(),
            log_type: DEFAULT_LOG_TYPE.into(),
            privatesend: PrivateSendParams::default(),
            instantsend: InstantSendParams::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PrivateSendParams {
    pub enabled: bool,
    /// Rounds a denominated coin must go through to count as anonymized
    pub rounds: u32,
    pub keep_amount: Amount,
    /// Allow one session per denomination instead of one overall
    pub multi_session: bool,
    /// Fee paid by denomination-creation transactions
    pub denomination_fee: Amount,
    pub dust_floor: Amount,
    pub max_denomination_outputs: usize,
    pub min_keys_left: u32,
    /// Interval between two scheduling passes
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    pub timeouts: TimeoutParams,
    pub pool: PoolParams,
    pub retry: RetryParams,
    pub relay: RelayParams,
    pub collateral: CollateralParams,
}

impl Default for PrivateSendParams {
    fn default() -> Self {
        Self {
            enabled: true,
            rounds: DEFAULT_ROUNDS,
            keep_amount: DEFAULT_KEEP_AMOUNT,
            multi_session: false,
            denomination_fee: 0,
            dust_floor: DUST_FLOOR,
            max_denomination_outputs: MAX_DENOMINATION_OUTPUTS,
            min_keys_left: MIN_KEYS_LEFT,
            tick_interval: TICK_INTERVAL,
            timeouts: TimeoutParams::default(),
            pool: PoolParams::default(),
            retry: RetryParams::default(),
            relay: RelayParams::default(),
            collateral: CollateralParams::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutParams {
    #[serde(with = "humantime_serde")]
    pub queue_ack: Duration,
    #[serde(with = "humantime_serde")]
    pub entry_collection: Duration,
    #[serde(with = "humantime_serde")]
    pub finalize: Duration,
    #[serde(with = "humantime_serde")]
    pub sign: Duration,
    /// Times an under-filled pool may go back to the queue
    pub max_requeues: u32,
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self {
            queue_ack: QUEUE_ACK_TIMEOUT,
            entry_collection: ENTRY_COLLECTION_TIMEOUT,
            finalize: FINALIZE_TIMEOUT,
            sign: SIGN_TIMEOUT,
            max_requeues: MAX_REQUEUES,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PoolParams {
    pub target_size: usize,
    pub min_size: usize,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            target_size: POOL_TARGET_SIZE,
            min_size: POOL_MIN_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RetryParams {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RelayParams {
    pub min_protocol_version: u32,
    #[serde(with = "humantime_serde")]
    pub max_last_seen: Duration,
    pub max_queue_occupancy: u32,
    pub recently_used_cap: usize,
}

impl Default for RelayParams {
    fn default() -> Self {
        Self {
            min_protocol_version: MIN_PROTOCOL_VERSION,
            max_last_seen: MAX_LAST_SEEN,
            max_queue_occupancy: MAX_QUEUE_OCCUPANCY,
            recently_used_cap: RECENTLY_USED_CAP,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CollateralParams {
    pub fee: Amount,
    pub max_multiplier: u64,
    #[serde(with = "humantime_serde")]
    pub used_ttl: Duration,
}

impl Default for CollateralParams {
    fn default() -> Self {
        Self {
            fee: COLLATERAL_FEE,
            max_multiplier: COLLATERAL_MAX_MULTIPLIER,
            used_ttl: COLLATERAL_USED_TTL,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct InstantSendParams {
    pub enabled: bool,
    pub max_value: Amount,
    pub max_inputs: usize,
    pub min_confirmations: u32,
    pub threshold: Threshold,
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
    /// Blocks a lock is kept after it has been reached
    pub keep_lock_blocks: u64,
}

impl Default for InstantSendParams {
    fn default() -> Self {
        Self {
            enabled: true,
            max_value: LOCK_MAX_VALUE,
            max_inputs: LOCK_MAX_INPUTS,
            min_confirmations: LOCK_MIN_CONFIRMATIONS,
            threshold: LOCK_THRESHOLD,
            expiry: LOCK_EXPIRY,
            keep_lock_blocks: KEEP_LOCK_BLOCKS,
        }
    }
}

impl Params {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml = std::fs::read_to_string(path)?;
        toml.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ps = &self.privatesend;
        if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&ps.rounds) {
            return Err(ConfigError::InvalidRounds(
                ps.rounds, MIN_ROUNDS, MAX_ROUNDS,
            ));
        }

        let pool = ps.pool;
        if pool.min_size < 2 || pool.min_size > pool.target_size {
            return Err(ConfigError::InvalidPoolSize {
                min: pool.min_size,
                target: pool.target_size,
            });
        }

        if self.instantsend.threshold.is_zero() {
            return Err(ConfigError::ZeroThreshold);
        }

        self.log_level()?;
        match self.log_type.as_str() {
            "coloured" | "plain" | "json" => Ok(()),
            other => Err(ConfigError::InvalidLogType(other.into())),
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }
}

impl FromStr for Params {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let params: Params = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }
}

impl std::fmt::Display for Params {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ps = &self.privatesend;
        write!(
            f,
            "privatesend: {}, rounds: {}, keep_amount: {}, multi_session: {}, \
             pool: {}/{}, max_retries: {}, instantsend: {}, threshold: {}, \
             lock_expiry: {:?}",
            ps.enabled,
            ps.rounds,
            format_amount(ps.keep_amount),
            ps.multi_session,
            ps.pool.min_size,
            ps.pool.target_size,
            ps.retry.max_retries,
            self.instantsend.enabled,
            self.instantsend.threshold,
            self.instantsend.expiry,
        )
    }
}
