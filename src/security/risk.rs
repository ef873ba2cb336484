// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Heuristic transaction risk scoring.
//!
//! Each matching signal adds its weight from the [`RiskPolicy`] table; the
//! sum is bucketed into a [`RiskLevel`] by two thresholds. The default
//! weights are uncalibrated heuristics and meant to be tuned per deployment.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ConfigError;
use crate::models::{AccountInfo, RequestOrigin, Transaction};

const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactorKind {
    StaleTransaction,
    NonSequentialNonce,
    ValueAnomaly,
    MaliciousPattern,
    UnknownIp,
    UnknownDevice,
}

/// One matched signal and what it contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    pub weight: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    /// Human-readable factor details, for surfacing as warnings.
    pub fn warnings(&self) -> Vec<String> {
        self.factors.iter().map(|f| f.detail.clone()).collect()
    }
}

/// A signing attempt refused on risk grounds.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("transaction rejected at {level} risk (score {score})")]
pub struct RiskRejection {
    pub level: RiskLevel,
    pub score: u32,
    pub factors: Vec<RiskFactor>,
}

impl From<RiskAssessment> for RiskRejection {
    fn from(assessment: RiskAssessment) -> Self {
        Self {
            level: assessment.level,
            score: assessment.score,
            factors: assessment.factors,
        }
    }
}

/// Known-bad transaction shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PatternRule {
    /// Value at or above this fraction (basis points) of the balance.
    Drain { balance_fraction_bps: u32 },
    /// Recipient on a deny list (case-insensitive).
    BlockedRecipient { addresses: Vec<String> },
    /// Sender and recipient are the same account.
    SelfTransfer,
}

impl PatternRule {
    fn matches(&self, tx: &Transaction, info: &AccountInfo) -> Option<String> {
        match self {
            PatternRule::Drain {
                balance_fraction_bps,
            } => {
                if info.balance == 0 || tx.value == 0 {
                    return None;
                }
                let lhs = tx.value.saturating_mul(BPS_DENOMINATOR);
                let rhs = info
                    .balance
                    .saturating_mul(u128::from(*balance_fraction_bps));
                (lhs >= rhs).then(|| {
                    format!(
                        "value {} is at least {}% of balance {}",
                        tx.value,
                        f64::from(*balance_fraction_bps) / 100.0,
                        info.balance
                    )
                })
            }
            PatternRule::BlockedRecipient { addresses } => addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&tx.to))
                .then(|| format!("recipient {} is blocked", tx.to)),
            PatternRule::SelfTransfer => tx
                .from
                .eq_ignore_ascii_case(&tx.to)
                .then(|| "sender and recipient are the same account".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub stale_transaction: u32,
    pub non_sequential_nonce: u32,
    pub value_anomaly: u32,
    /// Added once per matching pattern rule.
    pub malicious_pattern: u32,
    pub unknown_ip: u32,
    pub unknown_device: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            stale_transaction: 30,
            non_sequential_nonce: 50,
            value_anomaly: 20,
            malicious_pattern: 70,
            unknown_ip: 10,
            unknown_device: 10,
        }
    }
}

/// Weights, thresholds and rules for [`RiskAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub weights: RiskWeights,
    pub high_threshold: u32,
    pub medium_threshold: u32,
    pub max_transaction_age: Duration,
    pub enforce_sequential_nonces: bool,
    /// Values above `average * multiplier` are anomalous.
    pub value_anomaly_multiplier: u32,
    pub patterns: Vec<PatternRule>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            high_threshold: 70,
            medium_threshold: 30,
            max_transaction_age: Duration::from_secs(60 * 60),
            enforce_sequential_nonces: true,
            value_anomaly_multiplier: 5,
            patterns: vec![PatternRule::Drain {
                balance_fraction_bps: 9_500,
            }],
        }
    }
}

impl RiskPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: &str| ConfigError::InvalidValue {
            name,
            reason: reason.to_string(),
        };

        if self.medium_threshold == 0 {
            return Err(invalid("risk.medium_threshold", "must be greater than zero"));
        }
        if self.high_threshold <= self.medium_threshold {
            return Err(invalid(
                "risk.high_threshold",
                "must be greater than medium_threshold",
            ));
        }
        if self.value_anomaly_multiplier == 0 {
            return Err(invalid(
                "risk.value_anomaly_multiplier",
                "must be greater than zero",
            ));
        }
        if self.max_transaction_age.is_zero() {
            return Err(invalid(
                "risk.max_transaction_age",
                "must be greater than zero",
            ));
        }
        for rule in &self.patterns {
            if let PatternRule::Drain {
                balance_fraction_bps,
            } = rule
            {
                if *balance_fraction_bps == 0 || u128::from(*balance_fraction_bps) > BPS_DENOMINATOR {
                    return Err(invalid(
                        "risk.patterns.drain",
                        "balance_fraction_bps must be within 1..=10000",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn level_for(&self, score: u32) -> RiskLevel {
        if score >= self.high_threshold {
            RiskLevel::High
        } else if score >= self.medium_threshold {
            RiskLevel::Medium
        } else if score > 0 {
            RiskLevel::Low
        } else {
            RiskLevel::Safe
        }
    }
}

/// Scores transactions against account history and the pattern rules.
pub struct RiskAnalyzer {
    policy: RiskPolicy,
    clock: Arc<dyn Clock>,
}

impl RiskAnalyzer {
    pub fn new(policy: RiskPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Score `tx`. Reads the clock; mutates nothing.
    pub fn analyze(
        &self,
        tx: &Transaction,
        info: &AccountInfo,
        origin: Option<&RequestOrigin>,
    ) -> RiskAssessment {
        let weights = &self.policy.weights;
        let mut factors = Vec::new();

        let age_ms = self.clock.now_millis().saturating_sub(tx.timestamp);
        if age_ms > self.policy.max_transaction_age.as_millis() as i64 {
            factors.push(RiskFactor {
                kind: RiskFactorKind::StaleTransaction,
                weight: weights.stale_transaction,
                detail: format!("transaction is {}s old", age_ms / 1_000),
            });
        }

        if self.policy.enforce_sequential_nonces {
            if let Some(last) = info.last_nonce {
                if last.checked_add(1) != Some(tx.nonce) {
                    factors.push(RiskFactor {
                        kind: RiskFactorKind::NonSequentialNonce,
                        weight: weights.non_sequential_nonce,
                        detail: format!(
                            "nonce {} does not follow last nonce {last}",
                            tx.nonce
                        ),
                    });
                }
            }
        }

        if info.average_tx_value > 0 {
            let ceiling = info
                .average_tx_value
                .saturating_mul(u128::from(self.policy.value_anomaly_multiplier));
            if tx.value > ceiling {
                factors.push(RiskFactor {
                    kind: RiskFactorKind::ValueAnomaly,
                    weight: weights.value_anomaly,
                    detail: format!(
                        "value {} exceeds {}x the average of {}",
                        tx.value, self.policy.value_anomaly_multiplier, info.average_tx_value
                    ),
                });
            }
        }

        for rule in &self.policy.patterns {
            if let Some(detail) = rule.matches(tx, info) {
                factors.push(RiskFactor {
                    kind: RiskFactorKind::MaliciousPattern,
                    weight: weights.malicious_pattern,
                    detail,
                });
            }
        }

        if let Some(origin) = origin {
            if let Some(ip) = &origin.ip {
                if !info.known_ips.is_empty() && !info.known_ips.contains(ip) {
                    factors.push(RiskFactor {
                        kind: RiskFactorKind::UnknownIp,
                        weight: weights.unknown_ip,
                        detail: format!("request from unrecognised IP {ip}"),
                    });
                }
            }
            if let Some(device) = &origin.device_id {
                if !info.known_devices.is_empty() && !info.known_devices.contains(device) {
                    factors.push(RiskFactor {
                        kind: RiskFactorKind::UnknownDevice,
                        weight: weights.unknown_device,
                        detail: "request from unrecognised device".to_string(),
                    });
                }
            }
        }

        let score = factors
            .iter()
            .fold(0u32, |acc, f| acc.saturating_add(f.weight));

        RiskAssessment {
            score,
            level: self.policy.level_for(score),
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn analyzer(policy: RiskPolicy) -> RiskAnalyzer {
        RiskAnalyzer::new(policy, Arc::new(ManualClock::at_millis(NOW)))
    }

    fn tx(value: u128, nonce: u64) -> Transaction {
        Transaction {
            id: "tx".into(),
            from: "0xaaa".into(),
            to: "0xbbb".into(),
            value,
            nonce,
            timestamp: NOW,
            data: None,
        }
    }

    fn history() -> AccountInfo {
        AccountInfo {
            balance: 10_000,
            last_nonce: Some(4),
            average_tx_value: 100,
            known_ips: vec!["10.0.0.1".into()],
            known_devices: vec!["laptop".into()],
        }
    }

    fn kinds(assessment: &RiskAssessment) -> Vec<RiskFactorKind> {
        assessment.factors.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn ordinary_transaction_is_safe() {
        let assessment = analyzer(RiskPolicy::default()).analyze(&tx(100, 5), &history(), None);
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.level, RiskLevel::Safe);
        assert!(assessment.warnings().is_empty());
    }

    #[test]
    fn stale_transaction_adds_thirty() {
        let mut t = tx(100, 5);
        t.timestamp = NOW - 2 * 60 * 60 * 1_000;
        let assessment = analyzer(RiskPolicy::default()).analyze(&t, &history(), None);

        assert_eq!(kinds(&assessment), vec![RiskFactorKind::StaleTransaction]);
        assert_eq!(assessment.score, 30);
        assert_eq!(assessment.level, RiskLevel::Medium);
    }

    #[test]
    fn nonce_gap_adds_fifty_only_when_enforced_and_known() {
        let a = analyzer(RiskPolicy::default());
        let assessment = a.analyze(&tx(100, 9), &history(), None);
        assert_eq!(assessment.score, 50);
        assert_eq!(assessment.level, RiskLevel::Medium);

        let no_history = AccountInfo {
            last_nonce: None,
            ..history()
        };
        assert_eq!(a.analyze(&tx(100, 9), &no_history, None).score, 0);

        let relaxed = analyzer(RiskPolicy {
            enforce_sequential_nonces: false,
            ..RiskPolicy::default()
        });
        assert_eq!(relaxed.analyze(&tx(100, 9), &history(), None).score, 0);
    }

    #[test]
    fn value_anomaly_is_strictly_above_multiple() {
        let a = analyzer(RiskPolicy::default());
        assert_eq!(a.analyze(&tx(500, 5), &history(), None).score, 0);

        let assessment = a.analyze(&tx(501, 5), &history(), None);
        assert_eq!(kinds(&assessment), vec![RiskFactorKind::ValueAnomaly]);
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn drain_pattern_is_high_risk() {
        let info = AccountInfo {
            average_tx_value: 0,
            ..history()
        };
        let assessment = analyzer(RiskPolicy::default()).analyze(&tx(9_500, 5), &info, None);

        assert_eq!(kinds(&assessment), vec![RiskFactorKind::MaliciousPattern]);
        assert_eq!(assessment.score, 70);
        assert_eq!(assessment.level, RiskLevel::High);

        let below = analyzer(RiskPolicy::default()).analyze(&tx(9_499, 5), &info, None);
        assert_eq!(below.level, RiskLevel::Safe);
    }

    #[test]
    fn drain_needs_a_known_balance() {
        let info = AccountInfo::default();
        let assessment = analyzer(RiskPolicy::default()).analyze(&tx(1, 0), &info, None);
        assert_eq!(assessment.level, RiskLevel::Safe);
    }

    #[test]
    fn each_matching_rule_adds_its_weight() {
        let policy = RiskPolicy {
            patterns: vec![
                PatternRule::Drain {
                    balance_fraction_bps: 9_500,
                },
                PatternRule::BlockedRecipient {
                    addresses: vec!["0xBBB".into()],
                },
                PatternRule::SelfTransfer,
            ],
            ..RiskPolicy::default()
        };
        let info = AccountInfo {
            average_tx_value: 0,
            ..history()
        };
        let assessment = analyzer(policy).analyze(&tx(10_000, 5), &info, None);

        assert_eq!(assessment.factors.len(), 2);
        assert_eq!(assessment.score, 140);
    }

    #[test]
    fn unknown_origin_signals() {
        let a = analyzer(RiskPolicy::default());
        let origin = RequestOrigin {
            ip: Some("192.168.1.1".into()),
            device_id: Some("phone".into()),
        };
        let assessment = a.analyze(&tx(100, 5), &history(), Some(&origin));
        assert_eq!(
            kinds(&assessment),
            vec![RiskFactorKind::UnknownIp, RiskFactorKind::UnknownDevice]
        );
        assert_eq!(assessment.score, 20);

        // Without history for a dimension there is nothing to compare against.
        let fresh = AccountInfo {
            known_ips: vec![],
            known_devices: vec![],
            ..history()
        };
        assert_eq!(a.analyze(&tx(100, 5), &fresh, Some(&origin)).score, 0);
    }

    #[test]
    fn combined_signals_cross_high_threshold() {
        let mut t = tx(1_000, 9);
        t.timestamp = NOW - 2 * 60 * 60 * 1_000;
        let assessment = analyzer(RiskPolicy::default()).analyze(&t, &history(), None);

        // 30 stale + 50 nonce gap + 20 anomaly
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn thresholds_are_configurable() {
        let policy = RiskPolicy {
            high_threshold: 200,
            medium_threshold: 100,
            ..RiskPolicy::default()
        };
        assert_eq!(policy.level_for(99), RiskLevel::Low);
        assert_eq!(policy.level_for(100), RiskLevel::Medium);
        assert_eq!(policy.level_for(200), RiskLevel::High);
        assert_eq!(policy.level_for(0), RiskLevel::Safe);
    }

    #[test]
    fn policy_validation() {
        assert!(RiskPolicy::default().validate().is_ok());
        let inverted = RiskPolicy {
            high_threshold: 10,
            medium_threshold: 30,
            ..RiskPolicy::default()
        };
        assert!(inverted.validate().is_err());

        let bad_rule = RiskPolicy {
            patterns: vec![PatternRule::Drain {
                balance_fraction_bps: 20_000,
            }],
            ..RiskPolicy::default()
        };
        assert!(bad_rule.validate().is_err());
    }

    #[test]
    fn pattern_rules_deserialize_from_tagged_json() {
        let rules: Vec<PatternRule> = serde_json::from_str(
            r#"[{"rule":"drain","balance_fraction_bps":9000},{"rule":"self_transfer"}]"#,
        )
        .unwrap();
        assert_eq!(
            rules,
            vec![
                PatternRule::Drain {
                    balance_fraction_bps: 9_000
                },
                PatternRule::SelfTransfer
            ]
        );
    }
}
