// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction format validation.
//!
//! Runs before any ledger is touched. Field types are enforced by
//! deserialization; this checks presence, shape and the accepted timestamp
//! window `[now - max_transaction_age, now + max_clock_skew]`.

use crate::config::ValidationConfig;
use crate::models::Transaction;

const MAX_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("transaction timestamp is {age_ms} ms old (limit {limit_ms} ms)")]
    TooOld { age_ms: i64, limit_ms: i64 },

    #[error("transaction timestamp is {ahead_ms} ms in the future (limit {limit_ms} ms)")]
    InFuture { ahead_ms: i64, limit_ms: i64 },

    #[error("sender {from} does not match the session address {expected}")]
    SenderMismatch { from: String, expected: String },
}

fn check_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() > max_len {
        return Err(ValidationError::InvalidField {
            field,
            reason: format!("longer than {max_len} bytes"),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidField {
            field,
            reason: "contains whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Validate `tx` against `config` at time `now_ms` (unix milliseconds).
pub fn validate_transaction(
    tx: &Transaction,
    config: &ValidationConfig,
    now_ms: i64,
) -> Result<(), ValidationError> {
    check_text("id", &tx.id, MAX_ID_LEN)?;
    check_text("from", &tx.from, config.max_address_len)?;
    check_text("to", &tx.to, config.max_address_len)?;

    if tx.timestamp <= 0 {
        return Err(ValidationError::InvalidField {
            field: "timestamp",
            reason: "must be a positive unix millisecond value".to_string(),
        });
    }

    let max_age_ms = config.max_transaction_age.as_millis() as i64;
    let skew_ms = config.max_clock_skew.as_millis() as i64;

    let age_ms = now_ms.saturating_sub(tx.timestamp);
    if age_ms > max_age_ms {
        return Err(ValidationError::TooOld {
            age_ms,
            limit_ms: max_age_ms,
        });
    }
    if -age_ms > skew_ms {
        return Err(ValidationError::InFuture {
            ahead_ms: -age_ms,
            limit_ms: skew_ms,
        });
    }

    if let Some(data) = &tx.data {
        let size = serde_json::to_vec(data)
            .map_err(|e| ValidationError::InvalidField {
                field: "data",
                reason: e.to_string(),
            })?
            .len();
        if size > config.max_data_bytes {
            return Err(ValidationError::InvalidField {
                field: "data",
                reason: format!("{size} bytes exceeds limit of {}", config.max_data_bytes),
            });
        }
    }

    Ok(())
}

/// Sender must be the session's own address (EVM addresses compare
/// case-insensitively).
pub fn check_sender(tx: &Transaction, expected: &str) -> Result<(), ValidationError> {
    if tx.from.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ValidationError::SenderMismatch {
            from: tx.from.clone(),
            expected: expected.to_string(),
        })
    }
}
