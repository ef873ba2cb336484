// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password-based key envelopes.
//!
//! A private key at rest is AES-256-GCM ciphertext under a key derived from
//! the wallet password with Argon2id. Salt and nonce are fresh per envelope,
//! and the KDF parameters travel with it so older envelopes stay readable
//! after the defaults change.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::CryptoError;
use crate::config::KdfConfig;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Encrypted private key with everything needed to decrypt it except the
/// password. Binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub version: u32,
    pub kdf: KdfConfig,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn derive_key(
    password: &str,
    salt: &[u8],
    kdf: &KdfConfig,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let params = Params::new(
        kdf.memory_kib,
        kdf.iterations,
        kdf.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt `secret` under `password`.
///
/// CPU-bound (Argon2id); async callers run it on the blocking pool.
pub fn encrypt_secret(
    secret: &[u8],
    password: &str,
    kdf: &KdfConfig,
) -> Result<EncryptedKey, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::Encryption)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret)
        .map_err(|_| CryptoError::Encryption)?;

    Ok(EncryptedKey {
        version: ENVELOPE_VERSION,
        kdf: *kdf,
        salt: Base64::encode_string(&salt),
        nonce: Base64::encode_string(&nonce_bytes),
        ciphertext: Base64::encode_string(&ciphertext),
    })
}

/// Decrypt an envelope.
///
/// A wrong password always yields [`CryptoError::Decryption`]; the GCM tag
/// check guarantees corrupted plaintext is never returned.
pub fn decrypt_secret(
    envelope: &EncryptedKey,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope.version));
    }

    let salt = decode_field("salt", &envelope.salt)?;
    let nonce_bytes = decode_field("nonce", &envelope.nonce)?;
    let ciphertext = decode_field("ciphertext", &envelope.ciphertext)?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::MalformedEnvelope(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    if salt.len() < 8 {
        return Err(CryptoError::MalformedEnvelope(
            "salt must be at least 8 bytes".to_string(),
        ));
    }

    let key = derive_key(password, &salt, &envelope.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::Decryption)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    Base64::decode_vec(value)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid {name} encoding: {e}")))
}

#[cfg(test)]
pub(crate) fn test_kdf() -> KdfConfig {
    KdfConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}
