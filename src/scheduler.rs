// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cancellable timer registry.
//!
//! Every delayed or recurring action in the engine (reconnect backoff, circuit
//! cooldowns, pairing expiry, keep-alive, re-probes, failover retention) goes
//! through a [`Scheduler`] owned by the component that needs it. Timers are
//! keyed, so a node can never hold two pending reconnects: scheduling a key
//! cancels whatever was registered under it.
//!
//! # Task Kinds
//!
//! | Method | Cancellable by `cancel(key)` | Cancellable by `cancel_all()` |
//! |--------|------------------------------|-------------------------------|
//! | `schedule_after` | while waiting | while waiting and while running |
//! | `schedule_every` | always | always |
//! | `spawn` | always | always |
//!
//! A fired one-shot leaves the key table before its body runs. The body can
//! therefore re-schedule its own key (a reconnect scheduling the next
//! reconnect) without cancelling itself.
//!
//! `cancel_all()` is synchronous and closes the scheduler: later calls to
//! `schedule_*` or `spawn` are refused. A torn-down node never grows new timers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Entry {
    generation: u64,
    token: CancellationToken,
}

struct Table<K> {
    entries: HashMap<K, Entry>,
    next_generation: u64,
}

/// Keyed registry of cancellable tasks.
///
/// Cloning shares the registry.
pub struct Scheduler<K> {
    owner: Arc<str>,
    root: CancellationToken,
    table: Arc<Mutex<Table<K>>>,
}

impl<K> Clone for Scheduler<K> {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
            root: self.root.clone(),
            table: Arc::clone(&self.table),
        }
    }
}

impl<K> Scheduler<K>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    /// Create an empty scheduler. `owner` labels its log lines.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: Arc::from(owner.into()),
            root: CancellationToken::new(),
            table: Arc::new(Mutex::new(Table {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Register `key`, cancelling any task already registered under it.
    fn register(&self, key: K) -> Option<(u64, CancellationToken)> {
        let mut table = self.table.lock();
        // Checked under the lock so cancel_all() cannot interleave.
        if self.root.is_cancelled() {
            return None;
        }
        table.next_generation += 1;
        let generation = table.next_generation;
        let token = self.root.child_token();
        if let Some(previous) = table.entries.insert(
            key.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        ) {
            trace!(owner = %self.owner, ?key, "Replacing scheduled task");
            previous.token.cancel();
        }
        Some((generation, token))
    }

    fn release(table: &Mutex<Table<K>>, key: &K, generation: u64) {
        let mut table = table.lock();
        if table.entries.get(key).map(|e| e.generation) == Some(generation) {
            table.entries.remove(key);
        }
    }

    /// Run `task` once after `delay`.
    ///
    /// Returns `false` if the scheduler is closed.
    pub fn schedule_after<F, Fut>(&self, key: K, delay: Duration, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some((generation, token)) = self.register(key.clone()) else {
            debug!(owner = %self.owner, ?key, "Scheduler closed, timer refused");
            return false;
        };
        let table = Arc::clone(&self.table);
        let root = self.root.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            Self::release(&table, &key, generation);
            tokio::select! {
                biased;
                _ = root.cancelled() => {}
                _ = task() => {}
            }
        });
        true
    }

    /// Run `task` every `period`, first run one period from now.
    ///
    /// A run that overlaps the next tick delays it rather than bursting.
    pub fn schedule_every<F, Fut>(&self, key: K, period: Duration, task: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some((generation, token)) = self.register(key.clone()) else {
            debug!(owner = %self.owner, ?key, "Scheduler closed, interval refused");
            return false;
        };
        let table = Arc::clone(&self.table);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = task() => {}
                }
            }
            Self::release(&table, &key, generation);
        });
        true
    }

    /// Run `fut` now, tracked under `key` until it completes.
    pub fn spawn<Fut>(&self, key: K, fut: Fut) -> bool
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some((generation, token)) = self.register(key.clone()) else {
            debug!(owner = %self.owner, ?key, "Scheduler closed, task refused");
            return false;
        };
        let table = Arc::clone(&self.table);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
            Self::release(&table, &key, generation);
        });
        true
    }

    /// Cancel the task registered under `key`.
    ///
    /// Returns whether one was registered.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.table.lock().entries.remove(key);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every task and refuse new ones.
    pub fn cancel_all(&self) {
        let mut table = self.table.lock();
        self.root.cancel();
        let count = table.entries.len();
        table.entries.clear();
        if count > 0 {
            debug!(owner = %self.owner, cancelled = count, "Cancelled all scheduled tasks");
        }
    }

    /// Whether a task is registered (waiting, or for intervals and spawns, running) under `key`.
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.table.lock().entries.contains_key(key)
    }

    /// Number of registered tasks.
    pub fn pending(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether `cancel_all()` has been called.
    pub fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }
}
