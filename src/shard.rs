// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hash-sharded mutex table.
//!
//! Per-account state is split across a fixed number of independently locked
//! shards. A check-and-mutate sequence for one account holds exactly one
//! shard lock, so it is atomic for that account without serialising
//! unrelated accounts behind a single global lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Sharded<T> {
    shards: Box<[Mutex<T>]>,
}

impl<T> Sharded<T> {
    /// Build `count` shards (at least one) with `init`.
    pub fn new(count: usize, mut init: impl FnMut() -> T) -> Self {
        let shards = (0..count.max(1)).map(|_| Mutex::new(init())).collect();
        Self { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Lock the shard owning `key`.
    ///
    /// A poisoned shard is recovered rather than propagated: the guarded
    /// state is always left consistent between statements that can panic.
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, T> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Visit every shard in turn, one lock at a time.
    pub fn for_each(&self, mut f: impl FnMut(&mut T)) {
        for shard in self.shards.iter() {
            let mut guard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard);
        }
    }
}
