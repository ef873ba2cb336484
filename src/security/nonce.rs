// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-use replay-protection nonces.
//!
//! ## Eviction
//!
//! Memory is bounded two ways:
//!
//! 1. **Time**: each shard sweeps expired nonces at most once per
//!    `sweep_interval`, piggybacking on regular calls.
//! 2. **Size**: when a shard tracks more accounts than its share of
//!    `cache_size`, the accounts whose oldest outstanding nonce is oldest are
//!    evicted until the shard is back to 80% of its share. A single account
//!    is additionally capped at `max_nonces_per_account`.
//!
//! A nonce removed by a sweep or eviction reports `NotFound`, not `Expired`;
//! only a nonce that is still present but past its deadline reports `Expired`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::config::{to_delta, NonceConfig};
use crate::shard::Sharded;

/// A single-use token bound to one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nonce {
    pub value: String,
    pub account: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum NonceError {
    #[error("nonce not found")]
    NotFound,

    #[error("nonce expired")]
    Expired,
}

#[derive(Default)]
struct NonceShard {
    /// Per-account nonces in issue order (front is oldest).
    accounts: HashMap<String, VecDeque<Nonce>>,
    last_sweep: Option<DateTime<Utc>>,
}

impl NonceShard {
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.accounts.retain(|_, nonces| {
            let before = nonces.len();
            nonces.retain(|n| n.expires_at > now);
            removed += before - nonces.len();
            !nonces.is_empty()
        });
        self.last_sweep = Some(now);
        removed
    }

    fn maybe_sweep(&mut self, now: DateTime<Utc>, interval: chrono::Duration) {
        let due = match self.last_sweep {
            Some(last) => now - last >= interval,
            None => true,
        };
        if due {
            let removed = self.sweep(now);
            if removed > 0 {
                tracing::debug!(removed, "Swept expired nonces");
            }
        }
    }

    /// Evict oldest-nonce accounts until at most `target` remain.
    fn evict_to(&mut self, target: usize) -> usize {
        if self.accounts.len() <= target {
            return 0;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .accounts
            .iter()
            .filter_map(|(account, nonces)| {
                nonces.front().map(|oldest| (oldest.issued_at, account.clone()))
            })
            .collect();
        by_age.sort();

        let excess = self.accounts.len() - target;
        for (_, account) in by_age.into_iter().take(excess) {
            self.accounts.remove(&account);
        }
        excess
    }
}

/// Issues and single-use-verifies per-account nonces.
pub struct NonceRegistry {
    config: NonceConfig,
    clock: Arc<dyn Clock>,
    shards: Sharded<NonceShard>,
    shard_capacity: usize,
}

impl NonceRegistry {
    pub fn new(config: NonceConfig, clock: Arc<dyn Clock>) -> Self {
        let shards = Sharded::new(config.shards, NonceShard::default);
        let shard_capacity = config.cache_size.div_ceil(shards.len()).max(1);
        Self {
            config,
            clock,
            shards,
            shard_capacity,
        }
    }

    /// Issue a fresh nonce for `account`.
    ///
    /// The value is SHA-256 over the account, the current time and 32 bytes
    /// of OS randomness.
    pub fn generate_nonce(&self, account: &str, metadata: serde_json::Value) -> Nonce {
        let now = self.clock.now();

        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        let mut hasher = Sha256::new();
        hasher.update(account.as_bytes());
        hasher.update(now.timestamp_millis().to_be_bytes());
        hasher.update(entropy);
        let value = hex::encode(hasher.finalize());

        let nonce = Nonce {
            value,
            account: account.to_string(),
            issued_at: now,
            expires_at: now + to_delta(self.config.expiration),
            metadata,
        };

        let mut shard = self.shards.lock(account);
        shard.maybe_sweep(now, to_delta(self.config.sweep_interval));

        let nonces = shard.accounts.entry(account.to_string()).or_default();
        nonces.push_back(nonce.clone());
        while nonces.len() > self.config.max_nonces_per_account {
            nonces.pop_front();
        }

        if shard.accounts.len() > self.shard_capacity {
            let target = (self.shard_capacity * 8 / 10).max(1);
            let evicted = shard.evict_to(target);
            tracing::warn!(
                evicted,
                capacity = self.shard_capacity,
                "Nonce cache over capacity, evicted oldest accounts"
            );
        }

        nonce
    }

    /// Consume `value` for `account`.
    ///
    /// Succeeds at most once per nonce. An expired nonce is removed and
    /// reported as [`NonceError::Expired`].
    pub fn verify_nonce(&self, account: &str, value: &str) -> Result<Nonce, NonceError> {
        let now = self.clock.now();
        let mut shard = self.shards.lock(account);

        let result = match shard.accounts.get_mut(account) {
            None => Err(NonceError::NotFound),
            Some(nonces) => match nonces.iter().position(|n| n.value == value) {
                None => Err(NonceError::NotFound),
                Some(index) => {
                    let nonce = nonces.remove(index);
                    match nonce {
                        Some(n) if n.expires_at > now => Ok(n),
                        Some(_) => Err(NonceError::Expired),
                        None => Err(NonceError::NotFound),
                    }
                }
            },
        };

        if shard.accounts.get(account).is_some_and(VecDeque::is_empty) {
            shard.accounts.remove(account);
        }
        shard.maybe_sweep(now, to_delta(self.config.sweep_interval));

        result
    }

    /// Sweep every shard now, regardless of the sweep interval.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.shards.for_each(|shard| removed += shard.sweep(now));
        removed
    }

    /// Number of accounts holding at least one nonce.
    pub fn tracked_accounts(&self) -> usize {
        let mut total = 0;
        self.shards.for_each(|shard| total += shard.accounts.len());
        total
    }

    /// Outstanding nonces for `account`.
    pub fn outstanding(&self, account: &str) -> usize {
        self.shards
            .lock(account)
            .accounts
            .get(account)
            .map_or(0, VecDeque::len)
    }
}
