// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Every recognised option of the authorization core lives in one of the
//! structs below. A [`CoreConfig`] is built once at startup (defaults, then
//! optional environment overrides), validated, and handed to the services
//! by value.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NONCE_EXPIRATION_SECS` | Lifetime of an issued nonce | `86400` |
//! | `NONCE_CACHE_SIZE` | Max tracked accounts in the nonce registry | `10000` |
//! | `RATE_LIMIT_TRACKED_ACCOUNTS` | Max accounts with live rate windows | `100000` |
//! | `MAX_TRANSACTION_AGE_SECS` | Oldest accepted transaction timestamp | `3600` |
//! | `ENFORCE_SEQUENTIAL_NONCES` | Score non-sequential nonces as risky | `true` |
//! | `REJECT_HIGH_RISK` | Reject `high` risk in the security facade | `true` |
//! | `WALLET_AUTO_LOCK_SECS` | Session inactivity before auto-lock | `300` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::Tier;
use crate::security::risk::RiskPolicy;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const NONCE_EXPIRATION_ENV: &str = "NONCE_EXPIRATION_SECS";
pub const NONCE_CACHE_SIZE_ENV: &str = "NONCE_CACHE_SIZE";
pub const RATE_LIMIT_TRACKED_ACCOUNTS_ENV: &str = "RATE_LIMIT_TRACKED_ACCOUNTS";
pub const MAX_TRANSACTION_AGE_ENV: &str = "MAX_TRANSACTION_AGE_SECS";
pub const ENFORCE_SEQUENTIAL_NONCES_ENV: &str = "ENFORCE_SEQUENTIAL_NONCES";
pub const REJECT_HIGH_RISK_ENV: &str = "REJECT_HIGH_RISK";
pub const AUTO_LOCK_ENV: &str = "WALLET_AUTO_LOCK_SECS";

/// Upper bound for any configured duration (one year).
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("environment variable {name} is not valid: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

fn check_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(invalid(name, "must be greater than zero"));
    }
    if value > MAX_DURATION {
        return Err(invalid(name, "must not exceed one year"));
    }
    Ok(())
}

/// Convert a validated std duration into a chrono delta.
pub(crate) fn to_delta(value: Duration) -> chrono::Duration {
    chrono::Duration::from_std(value).unwrap_or(chrono::Duration::MAX)
}

// =============================================================================
// Component Configurations
// =============================================================================

/// Replay-protection registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long an issued nonce stays verifiable.
    pub expiration: Duration,
    /// Minimum spacing between opportunistic expiry sweeps of a shard.
    pub sweep_interval: Duration,
    /// Max accounts tracked before oldest-first eviction kicks in.
    pub cache_size: usize,
    /// Outstanding nonces kept per account; the oldest is dropped beyond this.
    pub max_nonces_per_account: usize,
    pub shards: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            cache_size: 10_000,
            max_nonces_per_account: 64,
            shards: 16,
        }
    }
}

/// Limits applied to one account tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_tx_per_minute: u32,
    /// Ceiling on the summed transaction value inside one aligned UTC day.
    pub max_value_per_day: u128,
}

/// Fixed-window rate limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default: TierLimits,
    pub premium: TierLimits,
    pub enterprise: TierLimits,
    /// Accounts with live windows; least recently used windows are dropped.
    pub max_tracked_accounts: usize,
    pub shards: usize,
}

impl RateLimitConfig {
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Default => self.default,
            Tier::Premium => self.premium,
            Tier::Enterprise => self.enterprise,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: TierLimits {
                max_tx_per_minute: 10,
                max_value_per_day: 10_000,
            },
            premium: TierLimits {
                max_tx_per_minute: 50,
                max_value_per_day: 100_000,
            },
            enterprise: TierLimits {
                max_tx_per_minute: 200,
                max_value_per_day: 10_000_000,
            },
            max_tracked_accounts: 100_000,
            shards: 16,
        }
    }
}

/// Transaction format validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Oldest acceptable transaction timestamp, relative to now.
    pub max_transaction_age: Duration,
    /// Tolerated clock skew for timestamps in the future.
    pub max_clock_skew: Duration,
    pub max_address_len: usize,
    /// Size cap for the serialized `data` payload.
    pub max_data_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_transaction_age: Duration::from_secs(60 * 60),
            max_clock_skew: Duration::from_secs(5 * 60),
            max_address_len: 128,
            max_data_bytes: 64 * 1024,
        }
    }
}

/// Security facade behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject `high` risk outright instead of returning it as a warning.
    pub reject_high_risk: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            reject_high_risk: true,
        }
    }
}

/// Argon2id parameters for password-derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Wallet session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session's key material is destroyed.
    pub auto_lock_timeout: Duration,
    /// Locked session ids remembered so late callers see `Expired`/`Locked`
    /// instead of `NotFound`.
    pub locked_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_lock_timeout: Duration::from_secs(5 * 60),
            locked_history: 4_096,
        }
    }
}

// =============================================================================
// Root Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub nonce: NonceConfig,
    pub rate_limit: RateLimitConfig,
    pub risk: RiskPolicy,
    pub validation: ValidationConfig,
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub kdf: KdfConfig,
}

impl CoreConfig {
    /// Defaults overlaid with any environment overrides, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>(NONCE_EXPIRATION_ENV)? {
            config.nonce.expiration = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>(NONCE_CACHE_SIZE_ENV)? {
            config.nonce.cache_size = size;
        }
        if let Some(size) = env_parse::<usize>(RATE_LIMIT_TRACKED_ACCOUNTS_ENV)? {
            config.rate_limit.max_tracked_accounts = size;
        }
        if let Some(secs) = env_parse::<u64>(MAX_TRANSACTION_AGE_ENV)? {
            let age = Duration::from_secs(secs);
            config.validation.max_transaction_age = age;
            config.risk.max_transaction_age = age;
        }
        if let Some(flag) = env_parse::<bool>(ENFORCE_SEQUENTIAL_NONCES_ENV)? {
            config.risk.enforce_sequential_nonces = flag;
        }
        if let Some(flag) = env_parse::<bool>(REJECT_HIGH_RISK_ENV)? {
            config.security.reject_high_risk = flag;
        }
        if let Some(secs) = env_parse::<u64>(AUTO_LOCK_ENV)? {
            config.session.auto_lock_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration("nonce.expiration", self.nonce.expiration)?;
        check_duration("nonce.sweep_interval", self.nonce.sweep_interval)?;
        if self.nonce.cache_size == 0 {
            return Err(invalid("nonce.cache_size", "must be greater than zero"));
        }
        if self.nonce.max_nonces_per_account == 0 {
            return Err(invalid(
                "nonce.max_nonces_per_account",
                "must be greater than zero",
            ));
        }

        for (name, limits) in [
            ("rate_limit.default", self.rate_limit.default),
            ("rate_limit.premium", self.rate_limit.premium),
            ("rate_limit.enterprise", self.rate_limit.enterprise),
        ] {
            if limits.max_tx_per_minute == 0 {
                return Err(invalid(name, "max_tx_per_minute must be greater than zero"));
            }
        }
        if self.rate_limit.max_tracked_accounts == 0 {
            return Err(invalid(
                "rate_limit.max_tracked_accounts",
                "must be greater than zero",
            ));
        }

        self.risk.validate()?;

        check_duration(
            "validation.max_transaction_age",
            self.validation.max_transaction_age,
        )?;
        if self.validation.max_clock_skew > MAX_DURATION {
            return Err(invalid(
                "validation.max_clock_skew",
                "must not exceed one year",
            ));
        }
        if self.validation.max_address_len == 0 {
            return Err(invalid(
                "validation.max_address_len",
                "must be greater than zero",
            ));
        }

        check_duration("session.auto_lock_timeout", self.session.auto_lock_timeout)?;

        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(invalid("kdf", "iterations and parallelism must be non-zero"));
        }
        if self.kdf.memory_kib < 8 * self.kdf.parallelism {
            return Err(invalid("kdf.memory_kib", "must be at least 8 KiB per lane"));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
        Err(_) => Ok(None),
    }
}
