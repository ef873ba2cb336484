// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail for security-sensitive wallet operations.
//!
//! Every session transition and signing decision produces an [`AuditEvent`].
//! Events go to an [`AuditSink`]; the default sink writes them as structured
//! records on the `audit` tracing target so the host's log pipeline can
//! route them separately from diagnostics.
//!
//! Events never carry key material, passwords or mnemonics.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Wallet events
    WalletGenerated,
    WalletImported,
    WalletRecovered,
    WalletExported,

    // Session events
    SessionOpened,
    SessionOpenFailed,
    SessionLocked,
    SessionAutoLocked,

    // Transaction events
    TransactionSigned,
    TransactionRejected,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub wallet_id: Option<String>,
    pub session_id: Option<String>,
    /// Additional details as JSON.
    pub details: Option<serde_json::Value>,
    pub success: bool,
    /// Error code if the operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            wallet_id: None,
            session_id: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Override the timestamp (services stamp events with their own clock).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_wallet(mut self, wallet_id: impl Into<String>) -> Self {
        self.wallet_id = Some(wallet_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with an error code.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Destination for audit events.
///
/// `record` is called inline on the operation's path and must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events on the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        if event.success {
            tracing::info!(
                target: "audit",
                event_id = %event.event_id,
                event_type = ?event.event_type,
                wallet_id = event.wallet_id.as_deref().unwrap_or(""),
                session_id = event.session_id.as_deref().unwrap_or(""),
                details = %details,
                "audit event"
            );
        } else {
            tracing::warn!(
                target: "audit",
                event_id = %event.event_id,
                event_type = ?event.event_type,
                wallet_id = event.wallet_id.as_deref().unwrap_or(""),
                session_id = event.session_id.as_deref().unwrap_or(""),
                details = %details,
                error = event.error.as_deref().unwrap_or(""),
                "audit event"
            );
        }
    }
}

/// Keeps events in memory. Used by tests and embedders that ship events
/// elsewhere in batches.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
