// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Session Manager
//!
//! Owns every decrypted key in the process. A key exists only inside a live
//! session and is dropped (and zeroized) when the session locks.
//!
//! ## Concurrency
//!
//! Sessions live in a map of `session id -> Arc<Mutex<Option<WalletSession>>>`.
//! The map lock is held only to look up, insert or remove a slot; all session
//! work happens under the slot's own lock. Lock order is always slot first,
//! then map or tombstone table.
//!
//! ## Auto-lock
//!
//! Every open or refresh arms a fresh [`AutoLockTimer`] tagged with the
//! session's generation. A timer that wakes after a newer refresh sees a
//! different generation and does nothing. The deadline is also checked on
//! every access, so a session never outlives `auto_lock_at` even without a
//! runtime to drive timers.
//!
//! ## Blocking work
//!
//! Argon2id and AES-GCM run on the tokio blocking pool.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::timer::AutoLockTimer;
use super::{
    ExportedWallet, GeneratedWallet, SessionError, SessionInfo, SignOptions, SignedTransaction,
    WalletRepository, EXPORT_FORMAT_VERSION,
};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::clock::Clock;
use crate::config::{to_delta, ConfigError, CoreConfig, KdfConfig, SessionConfig};
use crate::crypto::{decrypt_secret, encrypt_secret, keys, CryptoError, KeyHandle};
use crate::error::CoreError;
use crate::models::{KeyType, StoredWallet, Transaction};
use crate::security::{ReviewRequest, TransactionSecurityService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockReason {
    Manual,
    Expired,
}

impl LockReason {
    fn error(self) -> SessionError {
        match self {
            LockReason::Manual => SessionError::Locked,
            LockReason::Expired => SessionError::Expired,
        }
    }
}

struct WalletSession {
    id: String,
    wallet_id: String,
    address: String,
    key: KeyHandle,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    auto_lock_at: DateTime<Utc>,
    generation: u64,
    timer: Option<AutoLockTimer>,
}

impl WalletSession {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            wallet_id: self.wallet_id.clone(),
            address: self.address.clone(),
            key_type: self.key.key_type(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            auto_lock_at: self.auto_lock_at,
        }
    }
}

type SessionSlot = Arc<Mutex<Option<WalletSession>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    sessions: Mutex<HashMap<String, SessionSlot>>,
    /// Recently closed session ids, so callers learn why a session is gone.
    closed: Mutex<LruCache<String, LockReason>>,
    security: Arc<TransactionSecurityService>,
    session_config: SessionConfig,
    kdf: KdfConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    shutdown: CancellationToken,
}

impl Inner {
    fn audit(&self, event: AuditEvent) {
        self.audit.record(event.at(self.clock.now()));
    }

    fn slot(&self, session_id: &str) -> Result<SessionSlot, SessionError> {
        if let Some(slot) = lock(&self.sessions).get(session_id) {
            return Ok(slot.clone());
        }
        Err(self.closed_reason(session_id))
    }

    fn closed_reason(&self, session_id: &str) -> SessionError {
        lock(&self.closed)
            .peek(session_id)
            .map_or(SessionError::NotFound, |reason| reason.error())
    }

    /// The live session in `slot`, expiring it first if its deadline passed.
    fn live<'a>(
        &self,
        session_id: &str,
        slot: &'a mut Option<WalletSession>,
    ) -> Result<&'a mut WalletSession, SessionError> {
        let expired = match slot.as_ref() {
            None => return Err(self.closed_reason(session_id)),
            Some(session) => session.auto_lock_at < self.clock.now(),
        };
        if expired {
            self.close(slot, LockReason::Expired);
            return Err(SessionError::Expired);
        }
        slot.as_mut().ok_or(SessionError::Locked)
    }

    /// Push the deadline out by the auto-lock timeout and re-arm the timer.
    fn arm(self: &Arc<Self>, session: &mut WalletSession) {
        let now = self.clock.now();
        let timeout = self.session_config.auto_lock_timeout;
        session.last_activity = now;
        session.auto_lock_at = now + to_delta(timeout);
        session.generation += 1;

        let weak = Arc::downgrade(self);
        let session_id = session.id.clone();
        let generation = session.generation;
        // Replacing the old timer drops and thereby cancels it.
        session.timer = AutoLockTimer::spawn(&self.shutdown, timeout, move || {
            if let Some(inner) = weak.upgrade() {
                inner.auto_lock(&session_id, generation);
            }
        });
    }

    fn auto_lock(&self, session_id: &str, generation: u64) {
        let Ok(slot) = self.slot(session_id) else {
            return;
        };
        let mut guard = lock(&slot);
        if guard.as_ref().is_some_and(|s| s.generation == generation) {
            self.close(&mut guard, LockReason::Expired);
        }
    }

    /// Drop the session's key and record why. Returns false if already closed.
    fn close(&self, slot: &mut Option<WalletSession>, reason: LockReason) -> bool {
        let Some(session) = slot.take() else {
            return false;
        };
        if let Some(timer) = &session.timer {
            timer.cancel();
        }
        lock(&self.closed).put(session.id.clone(), reason);
        lock(&self.sessions).remove(&session.id);

        tracing::info!(
            session_id = %session.id,
            wallet_id = %session.wallet_id,
            ?reason,
            "Wallet session locked"
        );
        let event_type = match reason {
            LockReason::Manual => AuditEventType::SessionLocked,
            LockReason::Expired => AuditEventType::SessionAutoLocked,
        };
        self.audit(
            AuditEvent::new(event_type)
                .with_wallet(&session.wallet_id)
                .with_session(&session.id),
        );
        true
    }
}

/// Opens, refreshes, locks and signs through wallet sessions.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct WalletSessionManager {
    inner: Arc<Inner>,
}

impl WalletSessionManager {
    /// Build a manager from `config`, which is validated first.
    pub fn new(
        config: &CoreConfig,
        security: Arc<TransactionSecurityService>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let history = NonZeroUsize::new(config.session.locked_history).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                closed: Mutex::new(LruCache::new(history)),
                security,
                session_config: config.session.clone(),
                kdf: config.kdf,
                clock,
                audit,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn security(&self) -> &Arc<TransactionSecurityService> {
        &self.inner.security
    }

    // =========================================================================
    // Wallet lifecycle
    // =========================================================================

    /// Create a wallet from a fresh 12-word mnemonic.
    pub async fn generate_wallet(
        &self,
        key_type: KeyType,
        password: &str,
    ) -> Result<GeneratedWallet, CoreError> {
        let password = Zeroizing::new(password.to_string());
        let kdf = self.inner.kdf;
        let created_at = self.inner.clock.now();

        let (wallet, mnemonic) = run_blocking(move || {
            let generated = keys::generate_mnemonic(key_type)?;
            let wallet = seal(&generated.key, &password, &kdf, created_at)?;
            Ok((wallet, generated.phrase))
        })
        .await?;

        tracing::info!(wallet_id = %wallet.id, %key_type, "Generated wallet");
        self.inner.audit(
            AuditEvent::new(AuditEventType::WalletGenerated)
                .with_wallet(&wallet.id)
                .with_details(json!({ "key_type": key_type, "address": wallet.address })),
        );

        Ok(GeneratedWallet { wallet, mnemonic })
    }

    /// Re-encrypt an exported wallet under `new_password`.
    ///
    /// The imported wallet gets a fresh id; address and key are unchanged.
    pub async fn import_wallet(
        &self,
        exported: &ExportedWallet,
        export_password: &str,
        new_password: &str,
    ) -> Result<StoredWallet, CoreError> {
        if exported.format_version != EXPORT_FORMAT_VERSION {
            return Err(CryptoError::UnsupportedVersion(exported.format_version).into());
        }

        let envelope = exported.envelope.clone();
        let key_type = exported.key_type;
        let expected = exported.public_key.clone();
        let export_password = Zeroizing::new(export_password.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        let kdf = self.inner.kdf;
        let created_at = self.inner.clock.now();

        let result = run_blocking(move || {
            let secret = decrypt_secret(&envelope, &export_password)?;
            let key = KeyHandle::from_secret_bytes(key_type, &secret)?;
            if !key.public_key_hex().eq_ignore_ascii_case(&expected) {
                return Err(CryptoError::KeyMismatch);
            }
            seal(&key, &new_password, &kdf, created_at)
        })
        .await;

        let event = AuditEvent::new(AuditEventType::WalletImported)
            .with_details(json!({ "source_wallet_id": exported.wallet_id }));
        match result {
            Ok(wallet) => {
                tracing::info!(wallet_id = %wallet.id, source_wallet_id = %exported.wallet_id, "Imported wallet");
                self.inner.audit(event.with_wallet(&wallet.id));
                Ok(wallet)
            }
            Err(e) => {
                let err = CoreError::from(e);
                tracing::warn!(source_wallet_id = %exported.wallet_id, error = %err, "Wallet import failed");
                self.inner.audit(event.failed(err.error_code()));
                Err(err)
            }
        }
    }

    /// Re-derive a wallet from its backup phrase and encrypt it under
    /// `new_password`.
    pub async fn recover_wallet_from_mnemonic(
        &self,
        mnemonic: &str,
        key_type: KeyType,
        new_password: &str,
    ) -> Result<StoredWallet, CoreError> {
        let phrase = Zeroizing::new(mnemonic.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        let kdf = self.inner.kdf;
        let created_at = self.inner.clock.now();

        let result = run_blocking(move || {
            let mnemonic = keys::parse_mnemonic(&phrase)?;
            let key = KeyHandle::from_mnemonic(&mnemonic, key_type)?;
            seal(&key, &new_password, &kdf, created_at)
        })
        .await;

        match result {
            Ok(wallet) => {
                tracing::info!(wallet_id = %wallet.id, %key_type, "Recovered wallet from mnemonic");
                self.inner.audit(
                    AuditEvent::new(AuditEventType::WalletRecovered).with_wallet(&wallet.id),
                );
                Ok(wallet)
            }
            Err(e) => {
                let err = CoreError::from(e);
                self.inner
                    .audit(AuditEvent::new(AuditEventType::WalletRecovered).failed(err.error_code()));
                Err(err)
            }
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Decrypt `stored` and start a session. Returns the session id.
    ///
    /// A wrong password or a key that does not match the stored public key
    /// fails without creating anything. Fails with [`SessionError::ShutDown`]
    /// once [`Self::shutdown`] has been called.
    pub async fn open_wallet(
        &self,
        stored: &StoredWallet,
        password: &str,
    ) -> Result<String, CoreError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SessionError::ShutDown.into());
        }

        let envelope = stored.encrypted_private_key.clone();
        let key_type = stored.key_type;
        let expected = stored.public_key.clone();
        let password = Zeroizing::new(password.to_string());

        let result = run_blocking(move || {
            let secret = decrypt_secret(&envelope, &password)?;
            let key = KeyHandle::from_secret_bytes(key_type, &secret)?;
            if !key.public_key_hex().eq_ignore_ascii_case(&expected) {
                return Err(CryptoError::KeyMismatch);
            }
            Ok(key)
        })
        .await;

        let key = match result {
            Ok(key) => key,
            Err(e) => {
                let err = CoreError::from(e);
                tracing::warn!(wallet_id = %stored.id, error = %err, "Failed to open wallet");
                self.inner.audit(
                    AuditEvent::new(AuditEventType::SessionOpenFailed)
                        .with_wallet(&stored.id)
                        .failed(err.error_code()),
                );
                return Err(err);
            }
        };

        let now = self.inner.clock.now();
        let session_id = Uuid::new_v4().to_string();
        let session = WalletSession {
            id: session_id.clone(),
            wallet_id: stored.id.clone(),
            address: key.address(),
            key,
            created_at: now,
            last_activity: now,
            auto_lock_at: now,
            generation: 0,
            timer: None,
        };
        let slot: SessionSlot = Arc::new(Mutex::new(Some(session)));
        lock(&self.inner.sessions).insert(session_id.clone(), slot.clone());

        // Arm under the slot lock so a timer firing early finds the slot.
        let auto_lock_at = {
            let mut guard = lock(&slot);
            // A shutdown that raced this open may have missed the new slot.
            if self.inner.shutdown.is_cancelled() {
                self.inner.close(&mut guard, LockReason::Manual);
                return Err(SessionError::ShutDown.into());
            }
            let Some(session) = guard.as_mut() else {
                return Err(SessionError::Locked.into());
            };
            self.inner.arm(session);
            session.auto_lock_at
        };

        tracing::info!(
            session_id = %session_id,
            wallet_id = %stored.id,
            auto_lock_at = %auto_lock_at,
            "Wallet session opened"
        );
        self.inner.audit(
            AuditEvent::new(AuditEventType::SessionOpened)
                .with_wallet(&stored.id)
                .with_session(&session_id),
        );

        Ok(session_id)
    }

    /// Load a wallet through `repo` and open it.
    pub async fn open_wallet_by_id<R: WalletRepository + ?Sized>(
        &self,
        repo: &R,
        wallet_id: &str,
        password: &str,
    ) -> Result<String, CoreError> {
        let stored = repo.get_wallet_by_id(wallet_id)?;
        self.open_wallet(&stored, password).await
    }

    /// Record activity and push the auto-lock deadline out.
    pub fn update_wallet_activity(&self, session_id: &str) -> Result<(), SessionError> {
        let slot = self.inner.slot(session_id)?;
        let mut guard = lock(&slot);
        let session = self.inner.live(session_id, &mut guard)?;
        self.inner.arm(session);
        Ok(())
    }

    /// Whether the session is open. Expires it on the spot if overdue.
    pub fn is_session_valid(&self, session_id: &str) -> bool {
        let Ok(slot) = self.inner.slot(session_id) else {
            return false;
        };
        let mut guard = lock(&slot);
        self.inner.live(session_id, &mut guard).is_ok()
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let slot = self.inner.slot(session_id)?;
        let mut guard = lock(&slot);
        self.inner.live(session_id, &mut guard).map(|s| s.info())
    }

    /// Review and sign `tx` with the session's key.
    ///
    /// Format, sender and risk checks always run and high risk always
    /// blocks. `options.enforce_review` controls only whether the rate
    /// ledger is consulted and charged.
    pub fn sign_transaction(
        &self,
        session_id: &str,
        tx: &Transaction,
        options: &SignOptions,
    ) -> Result<SignedTransaction, CoreError> {
        let slot = self.inner.slot(session_id)?;
        let mut guard = lock(&slot);
        let session = self.inner.live(session_id, &mut guard)?;

        let review = ReviewRequest {
            account: &session.address,
            tier: options.tier,
            account_info: &options.account_info,
            origin: options.origin.as_ref(),
            expected_sender: Some(&session.address),
            charge_rate_limit: options.enforce_review,
            always_block_high_risk: true,
        };
        let authorization = match self.inner.security.authorize(tx, review) {
            Ok(authorization) => authorization,
            Err(e) => {
                tracing::warn!(
                    session_id,
                    tx_id = %tx.id,
                    error = %e,
                    "Transaction rejected"
                );
                self.inner.audit(
                    AuditEvent::new(AuditEventType::TransactionRejected)
                        .with_wallet(&session.wallet_id)
                        .with_session(session_id)
                        .with_details(json!({
                            "tx_id": tx.id,
                            "enforce_review": options.enforce_review,
                        }))
                        .failed(e.error_code()),
                );
                return Err(e);
            }
        };

        let signature = self.inner.security.sign_transaction(tx, &session.key)?;
        self.inner.arm(session);

        self.inner.audit(
            AuditEvent::new(AuditEventType::TransactionSigned)
                .with_wallet(&session.wallet_id)
                .with_session(session_id)
                .with_details(json!({
                    "tx_id": tx.id,
                    "to": tx.to,
                    "value": tx.value.to_string(),
                    "risk_level": authorization.assessment.level,
                    "risk_score": authorization.assessment.score,
                    "enforce_review": options.enforce_review,
                })),
        );

        Ok(SignedTransaction {
            session_id: session.id.clone(),
            wallet_id: session.wallet_id.clone(),
            transaction: tx.clone(),
            signature,
            assessment: authorization.assessment,
            warnings: authorization.warnings,
            signed_at: session.last_activity,
        })
    }

    /// Lock the session and drop its key. Returns false if it was not open.
    pub fn lock_wallet(&self, session_id: &str) -> bool {
        let Ok(slot) = self.inner.slot(session_id) else {
            return false;
        };
        let mut guard = lock(&slot);
        self.inner.close(&mut guard, LockReason::Manual)
    }

    /// Encrypt the session's key under `export_password` for backup.
    pub async fn export_wallet(
        &self,
        session_id: &str,
        export_password: &str,
    ) -> Result<ExportedWallet, CoreError> {
        let (secret, wallet_id, address, public_key, key_type) = {
            let slot = self.inner.slot(session_id)?;
            let mut guard = lock(&slot);
            let session = self.inner.live(session_id, &mut guard)?;
            (
                session.key.secret_bytes(),
                session.wallet_id.clone(),
                session.address.clone(),
                session.key.public_key_hex(),
                session.key.key_type(),
            )
        };

        let export_password = Zeroizing::new(export_password.to_string());
        let kdf = self.inner.kdf;
        let envelope = run_blocking(move || encrypt_secret(&secret, &export_password, &kdf)).await?;

        self.update_wallet_activity(session_id)?;

        tracing::info!(session_id, wallet_id = %wallet_id, "Exported wallet");
        self.inner.audit(
            AuditEvent::new(AuditEventType::WalletExported)
                .with_wallet(&wallet_id)
                .with_session(session_id),
        );

        Ok(ExportedWallet {
            format_version: EXPORT_FORMAT_VERSION,
            wallet_id,
            address,
            public_key,
            key_type,
            envelope,
            exported_at: self.inner.clock.now(),
        })
    }

    pub fn active_sessions(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    /// Cancel every timer and lock every open session. Later opens fail.
    ///
    /// Returns the number of sessions locked.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();

        let slots: Vec<SessionSlot> = lock(&self.inner.sessions).values().cloned().collect();
        let locked = slots
            .iter()
            .filter(|slot| self.inner.close(&mut lock(slot), LockReason::Manual))
            .count();

        tracing::info!(locked, "Wallet session manager shut down");
        locked
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::Worker(e.to_string()))?
}

fn seal(
    key: &KeyHandle,
    password: &str,
    kdf: &KdfConfig,
    created_at: DateTime<Utc>,
) -> Result<StoredWallet, CryptoError> {
    let secret = key.secret_bytes();
    let encrypted_private_key = encrypt_secret(&secret, password, kdf)?;

    Ok(StoredWallet {
        id: Uuid::new_v4().to_string(),
        address: key.address(),
        public_key: key.public_key_hex(),
        encrypted_private_key,
        key_type: key.key_type(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::crypto::envelope::test_kdf;
    use crate::models::AccountInfo;
    use crate::security::RiskLevel;
    use crate::wallet::InMemoryWalletRepository;
    use std::time::Duration;

    const PASSWORD: &str = "correct horse battery staple";

    /// Wall clock that follows tokio's (pausable) time.
    struct TokioClock {
        base: DateTime<Utc>,
        start: tokio::time::Instant,
    }

    impl TokioClock {
        fn new() -> Self {
            Self {
                base: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
        }
    }

    struct Harness {
        manager: WalletSessionManager,
        audit: Arc<MemoryAuditSink>,
        clock: Arc<dyn Clock>,
    }

    fn harness(clock: Arc<dyn Clock>) -> Harness {
        harness_with(clock, |_| {})
    }

    fn harness_with(clock: Arc<dyn Clock>, tweak: impl FnOnce(&mut CoreConfig)) -> Harness {
        let mut config = CoreConfig::default();
        config.kdf = test_kdf();
        tweak(&mut config);
        let security =
            Arc::new(TransactionSecurityService::new(&config, clock.clone()).unwrap());
        let audit = Arc::new(MemoryAuditSink::new());
        let manager =
            WalletSessionManager::new(&config, security, clock.clone(), audit.clone()).unwrap();
        Harness {
            manager,
            audit,
            clock,
        }
    }

    fn manual() -> (Harness, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        (harness(clock.clone()), clock)
    }

    fn tx(h: &Harness, from: &str, value: u128, nonce: u64) -> Transaction {
        Transaction {
            id: format!("tx-{nonce}"),
            from: from.to_string(),
            to: "0x000000000000000000000000000000000000dead".into(),
            value,
            nonce,
            timestamp: h.clock.now_millis(),
            data: None,
        }
    }

    async fn open_new(h: &Harness, key_type: KeyType) -> (StoredWallet, String) {
        let generated = h.manager.generate_wallet(key_type, PASSWORD).await.unwrap();
        let session = h
            .manager
            .open_wallet(&generated.wallet, PASSWORD)
            .await
            .unwrap();
        (generated.wallet, session)
    }

    fn session_error(err: CoreError) -> SessionError {
        match err {
            CoreError::Session(e) => e,
            other => panic!("expected session error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_open_sign_verify() {
        let (h, _) = manual();
        let generated = h
            .manager
            .generate_wallet(KeyType::Secp256k1, PASSWORD)
            .await
            .unwrap();
        assert_eq!(generated.mnemonic.split_whitespace().count(), 12);
        assert!(generated.wallet.address.starts_with("0x"));

        let session = h
            .manager
            .open_wallet(&generated.wallet, PASSWORD)
            .await
            .unwrap();
        assert_eq!(h.manager.active_sessions(), 1);

        let t = tx(&h, &generated.wallet.address, 100, 1);
        let signed = h
            .manager
            .sign_transaction(&session, &t, &SignOptions::default())
            .unwrap();

        assert_eq!(signed.wallet_id, generated.wallet.id);
        assert_eq!(signed.assessment.level, RiskLevel::Safe);
        assert!(h
            .manager
            .security()
            .verify_transaction_signature(
                &t,
                &signed.signature.signature,
                &generated.wallet.public_key,
                KeyType::Secp256k1,
            )
            .unwrap());
        assert!(h
            .audit
            .event_types()
            .contains(&AuditEventType::TransactionSigned));
    }

    #[tokio::test]
    async fn wrong_password_creates_no_session() {
        let (h, _) = manual();
        let generated = h
            .manager
            .generate_wallet(KeyType::Ed25519, PASSWORD)
            .await
            .unwrap();

        let err = h
            .manager
            .open_wallet(&generated.wallet, "wrong password")
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "invalid_password");
        assert_eq!(h.manager.active_sessions(), 0);
        let failed = h
            .audit
            .events()
            .into_iter()
            .find(|e| e.event_type == AuditEventType::SessionOpenFailed)
            .unwrap();
        assert!(!failed.success);
    }

    #[tokio::test]
    async fn mismatched_public_key_is_rejected() {
        let (h, _) = manual();
        let (mut wallet, _) = open_new(&h, KeyType::Secp256k1).await;
        let other = h
            .manager
            .generate_wallet(KeyType::Secp256k1, PASSWORD)
            .await
            .unwrap();
        wallet.public_key = other.wallet.public_key;

        let err = h.manager.open_wallet(&wallet, PASSWORD).await.unwrap_err();
        assert_eq!(err.error_code(), "key_mismatch");
        assert_eq!(h.manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_locks_after_inactivity() {
        let h = harness(Arc::new(TokioClock::new()));
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;

        assert_eq!(h.manager.active_sessions(), 0);
        assert!(!h.manager.is_session_valid(&session));
        let err = h
            .manager
            .sign_transaction(&session, &tx(&h, &wallet.address, 1, 1), &SignOptions::default())
            .unwrap_err();
        assert_eq!(session_error(err), SessionError::Expired);
        assert!(h
            .audit
            .event_types()
            .contains(&AuditEventType::SessionAutoLocked));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_auto_lock() {
        let h = harness(Arc::new(TokioClock::new()));
        let (_, session) = open_new(&h, KeyType::Ed25519).await;

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        h.manager.update_wallet_activity(&session).unwrap();

        // Past the original deadline, before the refreshed one.
        tokio::time::sleep(Duration::from_secs(3 * 60)).await;
        assert!(h.manager.is_session_valid(&session));
        assert_eq!(h.manager.active_sessions(), 1);

        tokio::time::sleep(Duration::from_secs(3 * 60)).await;
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(
            h.manager.update_wallet_activity(&session),
            Err(SessionError::Expired)
        );
    }

    #[tokio::test]
    async fn overdue_session_expires_on_access() {
        let (h, clock) = manual();
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;

        clock.advance(chrono::Duration::minutes(6));

        assert!(!h.manager.is_session_valid(&session));
        let err = h
            .manager
            .sign_transaction(&session, &tx(&h, &wallet.address, 1, 1), &SignOptions::default())
            .unwrap_err();
        assert_eq!(session_error(err), SessionError::Expired);
    }

    #[tokio::test]
    async fn signing_refreshes_deadline() {
        let (h, clock) = manual();
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;

        clock.advance(chrono::Duration::minutes(4));
        h.manager
            .sign_transaction(&session, &tx(&h, &wallet.address, 1, 1), &SignOptions::default())
            .unwrap();

        clock.advance(chrono::Duration::minutes(4));
        let info = h.manager.session_info(&session).unwrap();
        assert_eq!(info.auto_lock_at - info.last_activity, chrono::Duration::minutes(5));
        assert!(h.manager.is_session_valid(&session));
    }

    #[tokio::test]
    async fn high_risk_is_blocked_with_or_without_review() {
        let (h, _) = manual();
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;
        let t = tx(&h, &wallet.address, 990, 1);

        for enforce_review in [true, false] {
            let options = SignOptions {
                enforce_review,
                account_info: AccountInfo {
                    balance: 1_000,
                    ..AccountInfo::default()
                },
                ..SignOptions::default()
            };
            let err = h
                .manager
                .sign_transaction(&session, &t, &options)
                .unwrap_err();
            assert_eq!(err.error_code(), "high_risk_transaction");
        }

        assert!(h.manager.is_session_valid(&session));
        let rejected = h
            .audit
            .event_types()
            .into_iter()
            .filter(|t| *t == AuditEventType::TransactionRejected)
            .count();
        assert_eq!(rejected, 2);
    }

    #[tokio::test]
    async fn high_risk_is_blocked_even_when_rejection_disabled() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let h = harness_with(clock, |config| config.security.reject_high_risk = false);
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;
        let t = tx(&h, &wallet.address, 990, 1);

        for enforce_review in [true, false] {
            let options = SignOptions {
                enforce_review,
                account_info: AccountInfo {
                    balance: 1_000,
                    ..AccountInfo::default()
                },
                ..SignOptions::default()
            };
            let err = h
                .manager
                .sign_transaction(&session, &t, &options)
                .unwrap_err();
            match err {
                CoreError::Risk(rejection) => assert_eq!(rejection.level, RiskLevel::High),
                other => panic!("expected risk rejection, got {other:?}"),
            }
        }
        assert!(!h
            .audit
            .event_types()
            .contains(&AuditEventType::TransactionSigned));
    }

    #[tokio::test]
    async fn bypassing_review_skips_only_the_rate_ledger() {
        let (h, _) = manual();
        let (wallet, session) = open_new(&h, KeyType::Ed25519).await;
        let bypass = SignOptions {
            enforce_review: false,
            ..SignOptions::default()
        };

        for n in 1..=11 {
            h.manager
                .sign_transaction(&session, &tx(&h, &wallet.address, 1, n), &bypass)
                .unwrap();
        }
        assert!(h.manager.security().rate_usage(&wallet.address).is_none());

        let err = h
            .manager
            .sign_transaction(&session, &tx(&h, "0xsomeoneelse", 1, 12), &bypass)
            .unwrap_err();
        assert_eq!(err.error_code(), "sender_mismatch");

        let reviewed = SignOptions::default();
        for n in 1..=10 {
            h.manager
                .sign_transaction(&session, &tx(&h, &wallet.address, 1, n), &reviewed)
                .unwrap();
        }
        let err = h
            .manager
            .sign_transaction(&session, &tx(&h, &wallet.address, 1, 11), &reviewed)
            .unwrap_err();
        assert_eq!(err.error_code(), "rate_limit_exceeded");
    }

    #[tokio::test]
    async fn lock_is_idempotent_and_terminal() {
        let (h, _) = manual();
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;

        assert!(h.manager.lock_wallet(&session));
        assert!(!h.manager.lock_wallet(&session));
        assert!(!h.manager.is_session_valid(&session));
        assert_eq!(
            h.manager.update_wallet_activity(&session),
            Err(SessionError::Locked)
        );

        let err = h
            .manager
            .sign_transaction(&session, &tx(&h, &wallet.address, 1, 1), &SignOptions::default())
            .unwrap_err();
        assert_eq!(session_error(err), SessionError::Locked);

        assert_eq!(
            h.manager.update_wallet_activity("no-such-session"),
            Err(SessionError::NotFound)
        );
    }

    #[tokio::test]
    async fn export_then_import_preserves_key() {
        let (h, _) = manual();
        let (wallet, session) = open_new(&h, KeyType::Secp256k1).await;

        let exported = h.manager.export_wallet(&session, "export pw").await.unwrap();
        assert_eq!(exported.address, wallet.address);
        assert_ne!(exported.envelope, wallet.encrypted_private_key);

        let err = h
            .manager
            .import_wallet(&exported, "not the export pw", "new pw")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_password");

        let imported = h
            .manager
            .import_wallet(&exported, "export pw", "new pw")
            .await
            .unwrap();
        assert_ne!(imported.id, wallet.id);
        assert_eq!(imported.address, wallet.address);
        assert_eq!(imported.public_key, wallet.public_key);

        let reopened = h.manager.open_wallet(&imported, "new pw").await.unwrap();
        assert!(h.manager.is_session_valid(&reopened));
    }

    #[tokio::test]
    async fn recover_rederives_the_same_wallet() {
        let (h, _) = manual();
        for key_type in [KeyType::Secp256k1, KeyType::Ed25519] {
            let generated = h.manager.generate_wallet(key_type, PASSWORD).await.unwrap();
            let messy = format!("  {}  ", generated.mnemonic.to_uppercase());

            let recovered = h
                .manager
                .recover_wallet_from_mnemonic(&messy, key_type, "fresh pw")
                .await
                .unwrap();

            assert_eq!(recovered.address, generated.wallet.address);
            assert_eq!(recovered.public_key, generated.wallet.public_key);
            h.manager.open_wallet(&recovered, "fresh pw").await.unwrap();
        }
    }

    #[tokio::test]
    async fn recover_rejects_invalid_phrase() {
        let (h, _) = manual();
        let err = h
            .manager
            .recover_wallet_from_mnemonic("abandon abandon abandon", KeyType::Secp256k1, "pw")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_mnemonic");
    }

    #[tokio::test]
    async fn open_by_id_goes_through_repository() {
        let (h, _) = manual();
        let repo = InMemoryWalletRepository::new();
        let generated = h
            .manager
            .generate_wallet(KeyType::Ed25519, PASSWORD)
            .await
            .unwrap();
        let wallet_id = generated.wallet.id.clone();
        repo.save_wallet(generated.wallet).unwrap();

        let session = h
            .manager
            .open_wallet_by_id(&repo, &wallet_id, PASSWORD)
            .await
            .unwrap();
        assert_eq!(h.manager.session_info(&session).unwrap().wallet_id, wallet_id);

        let err = h
            .manager
            .open_wallet_by_id(&repo, "missing", PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "wallet_not_found");
    }

    #[tokio::test]
    async fn shutdown_locks_every_session() {
        let (h, _) = manual();
        let (_, first) = open_new(&h, KeyType::Secp256k1).await;
        let (_, second) = open_new(&h, KeyType::Ed25519).await;

        assert_eq!(h.manager.shutdown(), 2);
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(
            h.manager.update_wallet_activity(&first),
            Err(SessionError::Locked)
        );
        assert!(!h.manager.is_session_valid(&second));
    }

    #[tokio::test]
    async fn open_after_shutdown_is_refused() {
        let (h, _) = manual();
        let generated = h
            .manager
            .generate_wallet(KeyType::Secp256k1, PASSWORD)
            .await
            .unwrap();
        h.manager.shutdown();

        let err = h
            .manager
            .open_wallet(&generated.wallet, PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(session_error(err), SessionError::ShutDown);
        assert_eq!(h.manager.active_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeout_still_locks_the_session() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let h = harness_with(clock, |config| {
            config.session.auto_lock_timeout = Duration::from_millis(1);
        });
        let (_, session) = open_new(&h, KeyType::Ed25519).await;

        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(
            h.manager.update_wallet_activity(&session),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn invalid_config_is_refused() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let config = CoreConfig::default();
        let security =
            Arc::new(TransactionSecurityService::new(&config, clock.clone()).unwrap());

        let mut broken = config.clone();
        broken.session.auto_lock_timeout = Duration::ZERO;
        let result =
            WalletSessionManager::new(&broken, security, clock, Arc::new(MemoryAuditSink::new()));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
