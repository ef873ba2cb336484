// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window transaction rate and value limits.
//!
//! Windows are aligned to wall-clock boundaries: the minute bucket is
//! `now_ms / 60_000` and the day bucket is `now_ms / 86_400_000` (UTC), so a
//! window resets at the boundary, not one minute after first use.
//!
//! Both ledgers are checked before either is committed. A denied call
//! consumes neither a minute slot nor any of the day's value allowance.
//!
//! ## Bounded tracking
//!
//! Each shard tracks at most `max_tracked_accounts / shards` accounts. A
//! window is only ever dropped once its day bucket has passed, since a
//! window still holding the current day's value total is the ceiling itself.
//! When a shard is full of current windows, new accounts are refused with
//! [`RateLimitError::RateLimitExceeded`] until the next UTC day frees room.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::shard::Sharded;

const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 86_400_000;

/// Account tier selecting a row of the limit table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Default,
    Premium,
    Enterprise,
}

impl FromStr for Tier {
    type Err = Infallible;

    /// Unknown tier names fall back to [`Tier::Default`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "premium" => Tier::Premium,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Default,
        })
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("transaction rate limit exceeded; resets in {}ms", .reset_in.as_millis())]
    RateLimitExceeded { reset_in: Duration },

    #[error("daily value limit exceeded; resets in {}ms", .reset_in.as_millis())]
    ValueLimitExceeded { reset_in: Duration },
}

impl RateLimitError {
    pub fn reset_in(&self) -> Duration {
        match self {
            RateLimitError::RateLimitExceeded { reset_in }
            | RateLimitError::ValueLimitExceeded { reset_in } => *reset_in,
        }
    }
}

/// Remaining allowance after an approved check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateAllowance {
    pub remaining_tx: u32,
    pub remaining_value: u128,
}

/// Per-account counters for the current minute and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateWindow {
    pub minute_bucket: i64,
    pub tx_count: u32,
    pub day_bucket: i64,
    pub day_value: u128,
}

impl RateWindow {
    fn new(minute_bucket: i64, day_bucket: i64) -> Self {
        Self {
            minute_bucket,
            tx_count: 0,
            day_bucket,
            day_value: 0,
        }
    }

    /// Reset any bucket that is no longer current.
    fn roll(&mut self, minute_bucket: i64, day_bucket: i64) {
        if self.minute_bucket != minute_bucket {
            self.minute_bucket = minute_bucket;
            self.tx_count = 0;
        }
        if self.day_bucket != day_bucket {
            self.day_bucket = day_bucket;
            self.day_value = 0;
        }
    }
}

fn until(boundary_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(boundary_ms.saturating_sub(now_ms).max(0) as u64)
}

pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    /// Unbounded LRU per shard, ordered by last check. Size is enforced by
    /// `admit`, never by LRU eviction.
    shards: Sharded<LruCache<String, RateWindow>>,
    per_shard: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard = config.max_tracked_accounts.div_ceil(shard_count).max(1);
        Self {
            shards: Sharded::new(shard_count, LruCache::unbounded),
            per_shard,
            config,
            clock,
        }
    }

    /// Make room for a new account in `shard`.
    ///
    /// Windows are promoted on every check, so those last touched on an
    /// earlier day sit at the LRU end and are purged from there. Returns
    /// false when every tracked window still belongs to the current day.
    fn admit(&self, shard: &mut LruCache<String, RateWindow>, day: i64) -> bool {
        if shard.len() < self.per_shard {
            return true;
        }
        let mut purged = 0usize;
        while shard
            .peek_lru()
            .is_some_and(|(_, window)| window.day_bucket < day)
        {
            shard.pop_lru();
            purged += 1;
        }
        if purged > 0 {
            tracing::debug!(purged, "Purged stale rate windows");
        }
        shard.len() < self.per_shard
    }

    /// Check and, if allowed, record one transaction of `tx_value`.
    pub fn check(
        &self,
        account: &str,
        tier: Tier,
        tx_value: u128,
    ) -> Result<RateAllowance, RateLimitError> {
        let now = self.clock.now_millis();
        let minute = now.div_euclid(MINUTE_MS);
        let day = now.div_euclid(DAY_MS);
        let limits = self.config.limits(tier);

        let mut shard = self.shards.lock(account);
        if !shard.contains(account) {
            if !self.admit(&mut shard, day) {
                tracing::warn!(
                    account,
                    tracked = shard.len(),
                    "Rate window table full; refusing new account"
                );
                return Err(RateLimitError::RateLimitExceeded {
                    reset_in: until((day + 1) * DAY_MS, now),
                });
            }
            shard.put(account.to_string(), RateWindow::new(minute, day));
        }
        let Some(window) = shard.get_mut(account) else {
            return Err(RateLimitError::RateLimitExceeded {
                reset_in: until((minute + 1) * MINUTE_MS, now),
            });
        };
        window.roll(minute, day);

        if window.tx_count >= limits.max_tx_per_minute {
            let err = RateLimitError::RateLimitExceeded {
                reset_in: until((minute + 1) * MINUTE_MS, now),
            };
            tracing::info!(account, ?tier, count = window.tx_count, "Rate limit exceeded");
            return Err(err);
        }

        let day_value = if tx_value > 0 {
            match window.day_value.checked_add(tx_value) {
                Some(total) if total <= limits.max_value_per_day => total,
                _ => {
                    tracing::info!(account, ?tier, "Daily value limit exceeded");
                    return Err(RateLimitError::ValueLimitExceeded {
                        reset_in: until((day + 1) * DAY_MS, now),
                    });
                }
            }
        } else {
            window.day_value
        };

        window.tx_count += 1;
        window.day_value = day_value;

        Ok(RateAllowance {
            remaining_tx: limits.max_tx_per_minute - window.tx_count,
            remaining_value: limits.max_value_per_day.saturating_sub(window.day_value),
        })
    }

    /// Current counters for `account` without recording anything.
    ///
    /// Buckets from an earlier window read as zero.
    pub fn usage(&self, account: &str) -> Option<RateWindow> {
        let now = self.clock.now_millis();
        let shard = self.shards.lock(account);
        shard.peek(account).map(|window| {
            let mut window = *window;
            window.roll(now.div_euclid(MINUTE_MS), now.div_euclid(DAY_MS));
            window
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TierLimits;
    use chrono::Duration as ChronoDuration;

    // 2023-11-14T22:13:20Z, 20s into a minute.
    const START_MS: i64 = 1_700_000_000_000;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::at_millis(START_MS);
        (RateLimiter::new(config, Arc::new(clock.clone())), clock)
    }

    fn with_default(max_tx_per_minute: u32, max_value_per_day: u128) -> RateLimitConfig {
        RateLimitConfig {
            default: TierLimits {
                max_tx_per_minute,
                max_value_per_day,
            },
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn eleventh_call_in_a_minute_is_denied() {
        let (limiter, clock) = limiter(with_default(10, 1_000_000));

        for i in 0..10 {
            let allowance = limiter.check("alice", Tier::Default, 1).unwrap();
            assert_eq!(allowance.remaining_tx, 9 - i);
        }

        let err = limiter.check("alice", Tier::Default, 1).unwrap_err();
        assert!(matches!(err, RateLimitError::RateLimitExceeded { .. }));
        // 20s into the minute → 40s until the boundary.
        assert_eq!(err.reset_in(), Duration::from_secs(40));

        clock.advance(ChronoDuration::seconds(40));
        assert!(limiter.check("alice", Tier::Default, 1).is_ok());
    }

    #[test]
    fn window_is_aligned_not_rolling() {
        let (limiter, clock) = limiter(with_default(2, 1_000_000));
        limiter.check("alice", Tier::Default, 0).unwrap();
        limiter.check("alice", Tier::Default, 0).unwrap();

        // 39s later is still the same aligned minute.
        clock.advance(ChronoDuration::seconds(39));
        assert!(limiter.check("alice", Tier::Default, 0).is_err());

        // One more second crosses the boundary even though the first call
        // was under a minute ago.
        clock.advance(ChronoDuration::seconds(1));
        assert!(limiter.check("alice", Tier::Default, 0).is_ok());
    }

    #[test]
    fn value_ceiling_allows_exact_fill() {
        let (limiter, _) = limiter(with_default(100, 1_000));

        limiter.check("alice", Tier::Default, 950).unwrap();

        let err = limiter.check("alice", Tier::Default, 100).unwrap_err();
        assert!(matches!(err, RateLimitError::ValueLimitExceeded { .. }));

        let allowance = limiter.check("alice", Tier::Default, 50).unwrap();
        assert_eq!(allowance.remaining_value, 0);
        assert_eq!(limiter.usage("alice").unwrap().day_value, 1_000);
    }

    #[test]
    fn denied_value_does_not_consume_minute_slot() {
        let (limiter, _) = limiter(with_default(2, 100));

        limiter.check("alice", Tier::Default, 90).unwrap();
        assert!(limiter.check("alice", Tier::Default, 50).is_err());

        let usage = limiter.usage("alice").unwrap();
        assert_eq!(usage.tx_count, 1);
        assert_eq!(usage.day_value, 90);

        // The second slot is still available.
        assert!(limiter.check("alice", Tier::Default, 10).is_ok());
    }

    #[test]
    fn day_value_resets_at_utc_midnight() {
        let (limiter, clock) = limiter(with_default(100, 1_000));
        limiter.check("alice", Tier::Default, 1_000).unwrap();

        let err = limiter.check("alice", Tier::Default, 1).unwrap_err();
        let reset_in = err.reset_in();
        assert!(reset_in > Duration::ZERO && reset_in <= Duration::from_secs(86_400));

        clock.advance(ChronoDuration::from_std(reset_in).unwrap());
        assert!(limiter.check("alice", Tier::Default, 1_000).is_ok());
    }

    #[test]
    fn zero_value_skips_value_ledger() {
        let (limiter, _) = limiter(with_default(10, 0));
        assert!(limiter.check("alice", Tier::Default, 0).is_ok());
        assert!(limiter.check("alice", Tier::Default, 1).is_err());
    }

    #[test]
    fn accounts_are_independent() {
        let (limiter, _) = limiter(with_default(1, 1_000));
        limiter.check("alice", Tier::Default, 1).unwrap();
        assert!(limiter.check("alice", Tier::Default, 1).is_err());
        assert!(limiter.check("bob", Tier::Default, 1).is_ok());
    }

    #[test]
    fn tiers_select_their_limits() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        let premium = limiter.check("p", Tier::Premium, 0).unwrap();
        let enterprise = limiter.check("e", Tier::Enterprise, 0).unwrap();
        assert_eq!(premium.remaining_tx, 49);
        assert_eq!(enterprise.remaining_tx, 199);
    }

    #[test]
    fn unknown_tier_falls_back_to_default() {
        assert_eq!("premium".parse::<Tier>().unwrap(), Tier::Premium);
        assert_eq!(" Enterprise ".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert_eq!("gold".parse::<Tier>().unwrap(), Tier::Default);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let (limiter, _) = limiter(with_default(10, u128::MAX));
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.check("alice", Tier::Default, 1).is_ok())
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 10);
    }

    fn churn_config() -> RateLimitConfig {
        RateLimitConfig {
            max_tracked_accounts: 4,
            shards: 1,
            ..with_default(10, 10_000)
        }
    }

    #[test]
    fn account_churn_never_resets_a_live_window() {
        let (limiter, clock) = limiter(churn_config());
        for _ in 0..10 {
            limiter.check("attacker", Tier::Default, 1_000).unwrap();
        }
        assert!(limiter.check("attacker", Tier::Default, 0).is_err());

        // Flood the table with other accounts in the same minute.
        let refused = (0..100)
            .filter(|i| limiter.check(&format!("other-{i}"), Tier::Default, 0).is_err())
            .count();
        assert_eq!(refused, 97);

        let usage = limiter.usage("attacker").unwrap();
        assert_eq!(usage.tx_count, 10);
        assert_eq!(usage.day_value, 10_000);
        assert!(limiter.check("attacker", Tier::Default, 0).is_err());

        // A new minute frees count slots but the day total still binds.
        clock.advance(ChronoDuration::minutes(1));
        let err = limiter.check("attacker", Tier::Default, 1).unwrap_err();
        assert!(matches!(err, RateLimitError::ValueLimitExceeded { .. }));
    }

    #[test]
    fn full_table_refuses_new_accounts_until_next_day() {
        let (limiter, clock) = limiter(churn_config());
        for name in ["a", "b", "c", "d"] {
            limiter.check(name, Tier::Default, 0).unwrap();
        }

        let err = limiter.check("e", Tier::Default, 0).unwrap_err();
        assert!(matches!(err, RateLimitError::RateLimitExceeded { .. }));
        assert!(limiter.usage("e").is_none());
        // Tracked accounts are unaffected.
        assert!(limiter.check("a", Tier::Default, 0).is_ok());

        clock.advance(ChronoDuration::from_std(err.reset_in()).unwrap());
        assert!(limiter.check("e", Tier::Default, 0).is_ok());
        assert!(limiter.usage("b").is_none());
    }

    #[test]
    fn only_previous_day_windows_are_purged() {
        let (limiter, clock) = limiter(churn_config());
        limiter.check("a", Tier::Default, 0).unwrap();
        limiter.check("b", Tier::Default, 0).unwrap();

        let allowance = limiter.check("z", Tier::Default, 10_000).unwrap();
        assert_eq!(allowance.remaining_value, 0);
        let to_midnight = limiter.check("z", Tier::Default, 1).unwrap_err().reset_in();
        clock.advance(ChronoDuration::from_std(to_midnight).unwrap());

        // Purging stops at "c", the first window from the current day.
        limiter.check("c", Tier::Default, 0).unwrap();
        limiter.check("d", Tier::Default, 0).unwrap();
        limiter.check("e", Tier::Default, 0).unwrap();

        assert!(limiter.usage("a").is_none());
        assert!(limiter.usage("c").is_some());
        assert!(limiter.usage("d").is_some());
        assert!(limiter.usage("e").is_some());
    }
}
