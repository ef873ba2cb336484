// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-shot cancellable timers for session auto-lock.
//!
//! Each timer is a tokio task racing a sleep against a
//! `tokio_util::sync::CancellationToken`. Tokens are children of the
//! manager's shutdown token, so shutting the manager down cancels every
//! pending timer at once. Dropping an [`AutoLockTimer`] cancels it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub(crate) struct AutoLockTimer {
    token: CancellationToken,
}

impl AutoLockTimer {
    /// Run `on_fire` after `delay` unless cancelled first.
    ///
    /// Returns `None` outside a tokio runtime; callers then rely on the
    /// deadline check performed on every session access.
    pub(crate) fn spawn(
        parent: &CancellationToken,
        delay: Duration,
        on_fire: impl FnOnce() + Send + 'static,
    ) -> Option<Self> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::debug!("No tokio runtime; auto-lock falls back to lazy expiry");
                return None;
            }
        };

        let token = parent.child_token();
        let task_token = token.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => on_fire(),
                _ = task_token.cancelled() => {}
            }
        });

        Some(Self { token })
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for AutoLockTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
