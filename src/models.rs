// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Value types shared across the authorization core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::EncryptedKey;

/// Signature scheme of a wallet key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// secp256k1 ECDSA (EVM-style accounts).
    Secp256k1,
    /// Ed25519 (Solana-style accounts).
    Ed25519,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Secp256k1 => write!(f, "secp256k1"),
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// A transaction submitted for signing.
///
/// Supplied by the caller and never mutated here. `value` is an integer
/// amount in the asset's base units and travels as a decimal string so
/// that it survives JSON consumers limited to 53-bit numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(with = "amount")]
    pub value: u128,
    pub nonce: u64,
    /// Unix milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Account history supplied by the caller for risk scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountInfo {
    #[serde(with = "amount")]
    pub balance: u128,
    /// Nonce of the last transaction seen for this account, if any.
    pub last_nonce: Option<u64>,
    #[serde(with = "amount")]
    pub average_tx_value: u128,
    pub known_ips: Vec<String>,
    pub known_devices: Vec<String>,
}

/// Where a signing request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOrigin {
    pub ip: Option<String>,
    pub device_id: Option<String>,
}

/// Persisted wallet record. The private key only exists here encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWallet {
    pub id: String,
    pub address: String,
    /// Hex-encoded public key (compressed SEC1 for secp256k1).
    pub public_key: String,
    pub encrypted_private_key: EncryptedKey,
    pub key_type: KeyType,
    pub created_at: DateTime<Utc>,
}

/// Decimal-string (de)serialization for `u128` amounts.
///
/// Deserialization also accepts plain JSON integers.
pub mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text
                .parse::<u128>()
                .map_err(|_| de::Error::custom(format!("invalid amount: {text}"))),
            Raw::Number(n) => Ok(u128::from(n)),
        }
    }
}
