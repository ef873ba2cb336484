// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction security checks and the facade that sequences them.
//!
//! ## Components
//!
//! - `validation` - shape and timestamp window of a transaction
//! - `nonce` - single-use, expiring replay-protection nonces
//! - `rate_limit` - per-account fixed-window count and value ledgers
//! - `risk` - additive heuristic risk scoring
//!
//! ## Authorization order
//!
//! [`TransactionSecurityService::authorize_and_sign`] stops at the first
//! failure: format, rate, risk, then signature. Nonce consumption stays with
//! the caller, which knows whether a request carries one.

pub mod nonce;
pub mod rate_limit;
pub mod risk;
pub mod validation;

use std::sync::Arc;

use serde::Serialize;

pub use nonce::{Nonce, NonceError, NonceRegistry};
pub use rate_limit::{RateAllowance, RateLimitError, RateLimiter, RateWindow, Tier};
pub use risk::{
    PatternRule, RiskAnalyzer, RiskAssessment, RiskFactor, RiskFactorKind, RiskLevel, RiskPolicy,
    RiskRejection,
};
pub use validation::ValidationError;

use crate::clock::Clock;
use crate::config::{ConfigError, CoreConfig, SecurityConfig, ValidationConfig};
use crate::crypto::{CryptoError, KeyHandle, SignatureService, TransactionSignature};
use crate::error::CoreError;
use crate::models::{AccountInfo, KeyType, RequestOrigin, Transaction};

/// Outcome of the pre-signing checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub assessment: RiskAssessment,
    /// `None` when the rate ledger was not consulted.
    pub allowance: Option<RateAllowance>,
    /// Non-blocking risk factors the caller should surface.
    pub warnings: Vec<String>,
}

/// A signature produced after every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedSignature {
    pub signature: TransactionSignature,
    pub assessment: RiskAssessment,
    pub allowance: Option<RateAllowance>,
    pub warnings: Vec<String>,
}

/// Inputs to [`TransactionSecurityService::authorize`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReviewRequest<'a> {
    pub account: &'a str,
    pub tier: Tier,
    pub account_info: &'a AccountInfo,
    pub origin: Option<&'a RequestOrigin>,
    /// When set, `tx.from` must equal this address.
    pub expected_sender: Option<&'a str>,
    /// When false the rate ledger is neither checked nor charged.
    pub charge_rate_limit: bool,
    /// Reject high risk whatever `security.reject_high_risk` says.
    pub always_block_high_risk: bool,
}

/// Facade over nonce, rate, risk and signature services.
///
/// Owns its state; construct one per process and share it behind an `Arc`.
pub struct TransactionSecurityService {
    nonces: NonceRegistry,
    rate_limiter: RateLimiter,
    risk: RiskAnalyzer,
    signer: SignatureService,
    validation: ValidationConfig,
    security: SecurityConfig,
    clock: Arc<dyn Clock>,
}

impl TransactionSecurityService {
    /// Build the service from `config`, which is validated first.
    pub fn new(config: &CoreConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            nonces: NonceRegistry::new(config.nonce.clone(), clock.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone(), clock.clone()),
            risk: RiskAnalyzer::new(config.risk.clone(), clock.clone()),
            signer: SignatureService::new(),
            validation: config.validation.clone(),
            security: config.security.clone(),
            clock,
        })
    }

    // =========================================================================
    // Individual checks
    // =========================================================================

    pub fn generate_nonce(&self, account: &str, metadata: serde_json::Value) -> Nonce {
        self.nonces.generate_nonce(account, metadata)
    }

    pub fn verify_nonce(&self, account: &str, value: &str) -> Result<Nonce, NonceError> {
        self.nonces.verify_nonce(account, value)
    }

    pub fn check_transaction_rate_limit(
        &self,
        account: &str,
        tier: Tier,
        tx_value: u128,
    ) -> Result<RateAllowance, RateLimitError> {
        self.rate_limiter.check(account, tier, tx_value)
    }

    pub fn analyze_transaction(
        &self,
        tx: &Transaction,
        account_info: &AccountInfo,
        origin: Option<&RequestOrigin>,
    ) -> RiskAssessment {
        self.risk.analyze(tx, account_info, origin)
    }

    /// Sign without any checks. Prefer [`Self::authorize_and_sign`].
    pub fn sign_transaction(
        &self,
        tx: &Transaction,
        key: &KeyHandle,
    ) -> Result<TransactionSignature, CryptoError> {
        self.signer.sign(tx, key)
    }

    pub fn verify_transaction_signature(
        &self,
        tx: &Transaction,
        signature: &str,
        public_key: &str,
        key_type: KeyType,
    ) -> Result<bool, CryptoError> {
        self.signer.verify(tx, signature, public_key, key_type)
    }

    pub fn validate_transaction_format(&self, tx: &Transaction) -> Result<(), ValidationError> {
        validation::validate_transaction(tx, &self.validation, self.clock.now_millis())
    }

    pub fn rate_usage(&self, account: &str) -> Option<RateWindow> {
        self.rate_limiter.usage(account)
    }

    // =========================================================================
    // Composed flow
    // =========================================================================

    /// Validate, rate-check and risk-screen `tx`, then sign it with `key`.
    pub fn authorize_and_sign(
        &self,
        tx: &Transaction,
        account: &str,
        tier: Tier,
        account_info: &AccountInfo,
        origin: Option<&RequestOrigin>,
        key: &KeyHandle,
    ) -> Result<AuthorizedSignature, CoreError> {
        let authorization = self.authorize(
            tx,
            ReviewRequest {
                account,
                tier,
                account_info,
                origin,
                expected_sender: None,
                charge_rate_limit: true,
                always_block_high_risk: false,
            },
        )?;
        let signature = self.signer.sign(tx, key)?;

        Ok(AuthorizedSignature {
            signature,
            assessment: authorization.assessment,
            allowance: authorization.allowance,
            warnings: authorization.warnings,
        })
    }

    /// Run the pre-signing checks in order, stopping at the first failure.
    pub(crate) fn authorize(
        &self,
        tx: &Transaction,
        request: ReviewRequest<'_>,
    ) -> Result<Authorization, CoreError> {
        self.validate_transaction_format(tx)?;
        if let Some(expected) = request.expected_sender {
            validation::check_sender(tx, expected)?;
        }

        let allowance = if request.charge_rate_limit {
            Some(
                self.rate_limiter
                    .check(request.account, request.tier, tx.value)?,
            )
        } else {
            None
        };

        let assessment = self
            .risk
            .analyze(tx, request.account_info, request.origin);
        let block_high = request.always_block_high_risk || self.security.reject_high_risk;
        let warnings = screen(&assessment, &tx.id, block_high)?;

        Ok(Authorization {
            assessment,
            allowance,
            warnings,
        })
    }
}

/// Block high risk when `block_high` is set; everything else becomes warnings.
fn screen(
    assessment: &RiskAssessment,
    tx_id: &str,
    block_high: bool,
) -> Result<Vec<String>, RiskRejection> {
    if assessment.level == RiskLevel::High && block_high {
        tracing::warn!(
            tx_id,
            score = assessment.score,
            factors = assessment.factors.len(),
            "Rejecting high-risk transaction"
        );
        return Err(RiskRejection::from(assessment.clone()));
    }
    if assessment.level != RiskLevel::Safe {
        tracing::debug!(
            tx_id,
            level = %assessment.level,
            score = assessment.score,
            "Transaction approved with risk warnings"
        );
    }
    Ok(assessment.warnings())
}
