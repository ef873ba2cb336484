// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-wide error type.
//!
//! Each concern owns its own `thiserror` enum; [`CoreError`] aggregates them
//! so callers can use `?` across module boundaries and still map every
//! failure to a stable machine-readable code.

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::security::{NonceError, RateLimitError, RiskRejection, ValidationError};
use crate::wallet::{RepositoryError, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Nonce(#[from] NonceError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Risk(#[from] RiskRejection),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CoreError {
    /// Get the error code for this error.
    ///
    /// Codes are stable; an HTTP layer can match on them without parsing
    /// messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Validation(ValidationError::SenderMismatch { .. }) => "sender_mismatch",
            CoreError::Validation(ValidationError::TooOld { .. }) => "transaction_too_old",
            CoreError::Validation(ValidationError::InFuture { .. }) => "transaction_in_future",
            CoreError::Validation(_) => "invalid_transaction",
            CoreError::Nonce(NonceError::NotFound) => "nonce_not_found",
            CoreError::Nonce(NonceError::Expired) => "nonce_expired",
            CoreError::RateLimit(RateLimitError::RateLimitExceeded { .. }) => {
                "rate_limit_exceeded"
            }
            CoreError::RateLimit(RateLimitError::ValueLimitExceeded { .. }) => {
                "value_limit_exceeded"
            }
            CoreError::Risk(_) => "high_risk_transaction",
            CoreError::Session(SessionError::NotFound) => "session_not_found",
            CoreError::Session(SessionError::Expired) => "session_expired",
            CoreError::Session(SessionError::Locked) => "session_locked",
            CoreError::Session(SessionError::ShutDown) => "session_manager_shut_down",
            CoreError::Crypto(CryptoError::Decryption) => "invalid_password",
            CoreError::Crypto(CryptoError::InvalidMnemonic(_)) => "invalid_mnemonic",
            CoreError::Crypto(CryptoError::KeyMismatch) => "key_mismatch",
            CoreError::Crypto(_) => "crypto_error",
            CoreError::Config(_) => "invalid_config",
            CoreError::Repository(RepositoryError::NotFound(_)) => "wallet_not_found",
            CoreError::Repository(_) => "repository_error",
        }
    }

    /// Whether the caller may retry the same request later unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::RateLimit(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
