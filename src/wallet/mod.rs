// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet lifecycle and in-memory signing sessions.
//!
//! ## Session states
//!
//! ```text
//! Closed --open_wallet--> Open --lock_wallet / auto-lock--> Locked
//! ```
//!
//! `Locked` is terminal for a session id; reopening the wallet creates a new
//! session. Only [`WalletSessionManager`] ever holds a decrypted key.

mod session;
mod store;
mod timer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use session::WalletSessionManager;
pub use store::{InMemoryWalletRepository, RepositoryError, WalletRepository};

use crate::crypto::{EncryptedKey, TransactionSignature};
use crate::models::{AccountInfo, KeyType, RequestOrigin, StoredWallet, Transaction};
use crate::security::{RiskAssessment, Tier};

/// Version of the [`ExportedWallet`] transport format.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("wallet session not found")]
    NotFound,

    #[error("wallet session expired")]
    Expired,

    #[error("wallet session is locked")]
    Locked,

    #[error("wallet session manager is shut down")]
    ShutDown,
}

/// A new wallet and its backup phrase.
///
/// The phrase is shown to the user once and never stored by the core.
pub struct GeneratedWallet {
    pub wallet: StoredWallet,
    pub mnemonic: Zeroizing<String>,
}

impl std::fmt::Debug for GeneratedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedWallet")
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

/// Portable wallet backup, encrypted under a separate export password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedWallet {
    pub format_version: u32,
    pub wallet_id: String,
    pub address: String,
    pub public_key: String,
    pub key_type: KeyType,
    pub envelope: EncryptedKey,
    pub exported_at: DateTime<Utc>,
}

/// Per-call signing options.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Charge the rate ledger. Format, sender and risk checks run either way.
    pub enforce_review: bool,
    pub tier: Tier,
    pub account_info: AccountInfo,
    pub origin: Option<RequestOrigin>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            enforce_review: true,
            tier: Tier::Default,
            account_info: AccountInfo::default(),
            origin: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedTransaction {
    pub session_id: String,
    pub wallet_id: String,
    pub transaction: Transaction,
    pub signature: TransactionSignature,
    pub assessment: RiskAssessment,
    pub warnings: Vec<String>,
    pub signed_at: DateTime<Utc>,
}

/// Public view of a live session. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub wallet_id: String,
    pub address: String,
    pub key_type: KeyType,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub auto_lock_at: DateTime<Utc>,
}
