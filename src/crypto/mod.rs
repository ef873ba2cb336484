// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic boundary of the authorization core.
//!
//! Nothing in here implements a primitive. Password-derived keys come from
//! Argon2id, key envelopes are AES-256-GCM, and signatures are secp256k1
//! ECDSA (`k256`) or Ed25519 (`ed25519-dalek`).
//!
//! - `envelope` - password-based encryption of private keys
//! - `keys` - in-memory key handles, mnemonic derivation, addresses
//! - `signature` - canonical transaction encoding, sign and verify

pub mod envelope;
pub mod keys;
pub mod signature;

pub use envelope::{decrypt_secret, encrypt_secret, EncryptedKey, ENVELOPE_VERSION};
pub use keys::{GeneratedMnemonic, KeyHandle};
pub use signature::{canonicalize, SignatureService, TransactionSignature};

/// Errors raised at the cryptographic boundary.
///
/// Messages never include key material or passwords.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,

    /// Wrong password or a tampered envelope; AES-GCM cannot tell them apart.
    #[error("decryption failed: wrong password or corrupted key envelope")]
    Decryption,

    #[error("unsupported key envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed key envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("decrypted key does not match the wallet's public key")]
    KeyMismatch,

    #[error("canonical encoding failed: {0}")]
    Encoding(String),

    #[error("crypto worker failed: {0}")]
    Worker(String),
}
