// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing and verification.
//!
//! Both paths go through [`canonicalize`], which is the only encoding of a
//! transaction that is ever signed. Object keys are emitted in sorted order
//! at every depth, so two JSON-equal transactions always produce the same
//! bytes regardless of how their `data` payload was built.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CryptoError, KeyHandle};
use crate::models::{KeyType, Transaction};

/// Detached signature over a canonical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub key_type: KeyType,
    /// Hex-encoded public key of the signer.
    pub public_key: String,
    /// Hex-encoded 64-byte signature.
    pub signature: String,
}

/// Deterministic byte encoding of a transaction.
pub fn canonicalize(tx: &Transaction) -> Result<Vec<u8>, CryptoError> {
    let value = serde_json::to_value(tx).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), CryptoError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&scalar(&Value::String(key.clone()))?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        other => out.push_str(&scalar(other)?),
    }
    Ok(())
}

fn scalar(value: &Value) -> Result<String, CryptoError> {
    serde_json::to_string(value).map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Signs and verifies canonical transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureService;

impl SignatureService {
    pub fn new() -> Self {
        Self
    }

    pub fn sign(
        &self,
        tx: &Transaction,
        key: &KeyHandle,
    ) -> Result<TransactionSignature, CryptoError> {
        let message = canonicalize(tx)?;
        let signature = key.sign(&message);

        Ok(TransactionSignature {
            key_type: key.key_type(),
            public_key: key.public_key_hex(),
            signature: hex::encode(signature),
        })
    }

    /// Verify `signature` (hex) over `tx` against `public_key` (hex).
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not match;
    /// undecodable keys or signatures are errors.
    pub fn verify(
        &self,
        tx: &Transaction,
        signature: &str,
        public_key: &str,
        key_type: KeyType,
    ) -> Result<bool, CryptoError> {
        let message = canonicalize(tx)?;
        let signature = hex::decode(signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let public_key =
            hex::decode(public_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        match key_type {
            KeyType::Secp256k1 => {
                use k256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};

                let key = VerifyingKey::from_sec1_bytes(&public_key)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let signature = Signature::from_slice(&signature)
                    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
                Ok(key.verify(&message, &signature).is_ok())
            }
            KeyType::Ed25519 => {
                use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

                let bytes: [u8; 32] = public_key.as_slice().try_into().map_err(|_| {
                    CryptoError::InvalidKey(format!(
                        "ed25519 public key must be 32 bytes, got {}",
                        public_key.len()
                    ))
                })?;
                let key = VerifyingKey::from_bytes(&bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                let signature = Signature::from_slice(&signature)
                    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
                Ok(key.verify(&message, &signature).is_ok())
            }
        }
    }

    /// Verify a detached signature against its embedded public key.
    pub fn verify_detached(
        &self,
        tx: &Transaction,
        signature: &TransactionSignature,
    ) -> Result<bool, CryptoError> {
        self.verify(
            tx,
            &signature.signature,
            &signature.public_key,
            signature.key_type,
        )
    }
}
