// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory key handles and deterministic key derivation.
//!
//! A [`KeyHandle`] is the only place decrypted private-key material lives.
//! It has no public accessor for the secret, is not `Clone`, and the
//! underlying signing keys zeroize themselves on drop.
//!
//! Keys are derived from a BIP39 mnemonic: the 64-byte seed is fed through
//! HMAC-SHA512 with a curve-specific domain string and the left half becomes
//! the private key. Only the master key is used; no derivation path.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use hmac::{Hmac, Mac};
use k256::ecdsa::signature::Signer as _;
use sha2::Sha512;
use sha3::{Digest, Keccak256};
use zeroize::{Zeroize, Zeroizing};

use super::CryptoError;
use crate::models::KeyType;

const SECP256K1_SEED_DOMAIN: &[u8] = b"Bitcoin seed";
const ED25519_SEED_DOMAIN: &[u8] = b"ed25519 seed";

/// Accepted mnemonic lengths.
const MNEMONIC_WORD_COUNTS: [usize; 2] = [12, 24];

enum SecretKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

/// Decrypted private key owned by one wallet session.
pub struct KeyHandle {
    secret: SecretKey,
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("key_type", &self.key_type())
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl KeyHandle {
    /// Rebuild a handle from raw private-key bytes (as stored in an envelope).
    pub(crate) fn from_secret_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = match key_type {
            KeyType::Secp256k1 => SecretKey::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?,
            ),
            KeyType::Ed25519 => {
                let mut raw: [u8; 32] = bytes.try_into().map_err(|_| {
                    CryptoError::InvalidKey(format!(
                        "ed25519 key must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                let key = ed25519_dalek::SigningKey::from_bytes(&raw);
                raw.zeroize();
                SecretKey::Ed25519(key)
            }
        };
        Ok(Self { secret })
    }

    /// Derive the master key for `key_type` from a validated mnemonic.
    pub(crate) fn from_mnemonic(mnemonic: &Mnemonic, key_type: KeyType) -> Result<Self, CryptoError> {
        let seed = Seed::new(mnemonic, "");
        let domain = match key_type {
            KeyType::Secp256k1 => SECP256K1_SEED_DOMAIN,
            KeyType::Ed25519 => ED25519_SEED_DOMAIN,
        };

        let mut mac = Hmac::<Sha512>::new_from_slice(domain)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        mac.update(seed.as_bytes());
        let mut output = mac.finalize().into_bytes();

        let result = Self::from_secret_bytes(key_type, &output[..32]);
        output.as_mut_slice().zeroize();
        result
    }

    pub fn key_type(&self) -> KeyType {
        match self.secret {
            SecretKey::Secp256k1(_) => KeyType::Secp256k1,
            SecretKey::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Public key bytes: compressed SEC1 (33 bytes) or Ed25519 (32 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match &self.secret {
            SecretKey::Secp256k1(key) => key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
            SecretKey::Ed25519(key) => key.verifying_key().to_bytes().to_vec(),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Account address for this key.
    ///
    /// secp256k1 keys use the EVM rule (last 20 bytes of the Keccak-256 of the
    /// uncompressed point, `0x`-prefixed); Ed25519 keys use the hex public key.
    pub fn address(&self) -> String {
        match &self.secret {
            SecretKey::Secp256k1(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let hash = Keccak256::digest(&point.as_bytes()[1..]);
                format!("0x{}", hex::encode(&hash[12..]))
            }
            SecretKey::Ed25519(key) => hex::encode(key.verifying_key().to_bytes()),
        }
    }

    /// Raw private-key bytes, for re-encryption only.
    pub(crate) fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        match &self.secret {
            SecretKey::Secp256k1(key) => {
                let mut bytes = key.to_bytes();
                let out = Zeroizing::new(bytes.to_vec());
                bytes.as_mut_slice().zeroize();
                out
            }
            SecretKey::Ed25519(key) => {
                let mut bytes = key.to_bytes();
                let out = Zeroizing::new(bytes.to_vec());
                bytes.zeroize();
                out
            }
        }
    }

    /// Sign `message` with this key. Returns the raw 64-byte signature.
    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.secret {
            SecretKey::Secp256k1(key) => {
                let signature: k256::ecdsa::Signature = key.sign(message);
                signature.to_bytes().to_vec()
            }
            SecretKey::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                key.sign(message).to_bytes().to_vec()
            }
        }
    }
}

/// A freshly generated mnemonic together with the key it derives.
pub struct GeneratedMnemonic {
    pub phrase: Zeroizing<String>,
    pub key: KeyHandle,
}

/// Generate a 12-word English mnemonic and derive its `key_type` key.
pub(crate) fn generate_mnemonic(key_type: KeyType) -> Result<GeneratedMnemonic, CryptoError> {
    let mnemonic = Mnemonic::new(MnemonicType::Words12, Language::English);
    let key = KeyHandle::from_mnemonic(&mnemonic, key_type)?;
    Ok(GeneratedMnemonic {
        phrase: Zeroizing::new(mnemonic.phrase().to_string()),
        key,
    })
}

/// Check word count and checksum of a user-supplied phrase.
///
/// Whitespace and letter case are normalised before validation.
pub(crate) fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, CryptoError> {
    let normalized = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );

    let words = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if !MNEMONIC_WORD_COUNTS.contains(&words) {
        return Err(CryptoError::InvalidMnemonic(format!(
            "expected 12 or 24 words, got {words}"
        )));
    }

    Mnemonic::from_phrase(&normalized, Language::English)
        .map_err(|e| CryptoError::InvalidMnemonic(e.to_string()))
}
