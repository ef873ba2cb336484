// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet persistence boundary.
//!
//! The core only needs to look wallets up by id and save new ones. Hosts
//! plug their own storage in behind [`WalletRepository`]; the in-memory
//! implementation backs tests and single-process embedders.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::models::StoredWallet;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("wallet not found: {0}")]
    NotFound(String),

    #[error("wallet already exists: {0}")]
    AlreadyExists(String),

    #[error("wallet storage error: {0}")]
    Storage(String),
}

/// Storage for encrypted wallets.
pub trait WalletRepository: Send + Sync {
    /// Persist a new wallet.
    ///
    /// Returns [`RepositoryError::AlreadyExists`] if the id is taken.
    fn save_wallet(&self, wallet: StoredWallet) -> Result<(), RepositoryError>;

    fn get_wallet_by_id(&self, wallet_id: &str) -> Result<StoredWallet, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryWalletRepository {
    wallets: RwLock<HashMap<String, StoredWallet>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WalletRepository for InMemoryWalletRepository {
    fn save_wallet(&self, wallet: StoredWallet) -> Result<(), RepositoryError> {
        let mut wallets = self.wallets.write().unwrap_or_else(PoisonError::into_inner);
        if wallets.contains_key(&wallet.id) {
            return Err(RepositoryError::AlreadyExists(wallet.id));
        }
        wallets.insert(wallet.id.clone(), wallet);
        Ok(())
    }

    fn get_wallet_by_id(&self, wallet_id: &str) -> Result<StoredWallet, RepositoryError> {
        self.wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(wallet_id.to_string()))
    }
}
