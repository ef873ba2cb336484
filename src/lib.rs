// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Wallet - Session & Transaction Authorization Core
//!
//! Holds decrypted signing keys in memory for bounded, auto-locking sessions
//! and gates every signature behind format validation, per-account rate and
//! value limits, and heuristic risk scoring. Replay protection is provided as
//! single-use expiring nonces.
//!
//! ## Modules
//!
//! - `wallet` - wallet lifecycle, sessions, auto-lock, repository boundary
//! - `security` - validation, nonces, rate limits, risk, and the facade
//! - `crypto` - key envelopes, key handles, canonical signing
//! - `audit` - audit events and sinks
//! - `config` - validated configuration with environment overrides
//! - `logging` - tracing subscriber setup
//!
//! ## Wiring
//!
//! ```rust,ignore
//! let config = CoreConfig::from_env()?;
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let security = Arc::new(TransactionSecurityService::new(&config, clock.clone())?);
//! let manager =
//!     WalletSessionManager::new(&config, security, clock, Arc::new(TracingAuditSink))?;
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod models;
pub mod security;
pub mod shard;
pub mod wallet;

pub use audit::{AuditEvent, AuditEventType, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use models::{AccountInfo, KeyType, RequestOrigin, StoredWallet, Transaction};
pub use security::{TransactionSecurityService, Tier};
pub use wallet::{
    InMemoryWalletRepository, SessionError, SignOptions, WalletRepository, WalletSessionManager,
};
