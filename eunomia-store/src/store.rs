// SPDX-FileCopyrightText: 2026 The eunomia authors
// SPDX-License-Identifier: MIT

//! Process-wide registry of per-path FIFO lock queues.
//!
//! [`LockStore`] owns the map from path to [`FileQueue`] and implements
//! admission (enqueue-or-acquire), holder release, session-wide release,
//! blocking wait-for-turn, snapshot introspection, and periodic TTL
//! eviction of stale holders.
//!
//! Locking discipline: the map itself is a sharded concurrent map; every
//! queue's state sits behind its own mutex. Map shards are only ever held
//! for a get/insert/remove, never across an await, so taking the map while
//! a queue mutex is held cannot deadlock. A queue is removed from the map
//! only under its own mutex, only when empty, and is marked retired at that
//! moment so that a task which fetched the `Arc` just before removal
//! retries against the map instead of mutating an orphan.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::queue::{FileQueue, QueueState};

/// Default maximum time a holder may keep a path before eviction is allowed.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// How long a blocked waiter sleeps before re-checking its position when no
/// wakeup arrives. This is a liveness backstop for the narrow window between
/// capturing the notifier and awaiting it; it bounds wakeup latency, not
/// correctness.
const RECHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of [`LockStore::enqueue_or_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// 1-indexed position in the queue; 1 means the session holds the path.
    pub position: usize,
    /// Queue length right after admission.
    pub queue_length: usize,
    /// Whether the session now holds the path.
    pub acquired: bool,
}

/// A currently held path, as surfaced by the introspection endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub session: String,
    pub file: String,
    pub acquired_at: DateTime<Utc>,
}

/// Snapshot of one queue: the holder plus the sessions lined up behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub file: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub queue_length: usize,
    pub waiters: Vec<String>,
}

/// The coordinator's lock table. One instance per process, shared across
/// request handlers; dropping it (or calling [`LockStore::shutdown`]) stops
/// the background sweeper.
pub struct LockStore {
    inner: Arc<StoreInner>,
    sweeper: JoinHandle<()>,
}

struct StoreInner {
    queues: DashMap<String, Arc<FileQueue>>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl LockStore {
    /// Create a store with the system clock and start its TTL sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self::with_clock(ttl, sweep_interval, Arc::new(SystemClock))
    }

    /// Create a store with an injected clock, for deterministic TTL tests.
    pub fn with_clock(ttl: Duration, sweep_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(StoreInner {
            queues: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
        });
        let sweeper = tokio::spawn(sweep_loop(Arc::downgrade(&inner), sweep_interval));
        Self { inner, sweeper }
    }

    /// Join the queue for `file`, acquiring it outright when the queue is
    /// empty or its holder has expired. Re-admission of an already queued
    /// session is a no-op that reports the current position.
    pub async fn enqueue_or_acquire(&self, file: &str, session: &str) -> Admission {
        loop {
            let queue = {
                let entry = self
                    .inner
                    .queues
                    .entry(file.to_string())
                    .or_insert_with(|| Arc::new(FileQueue::new()));
                Arc::clone(entry.value())
            };
            let mut state = queue.state.lock().await;
            if state.retired {
                // Lost the race against removal of the emptied queue; the
                // map has (or will get) a fresh one.
                continue;
            }

            let now = self.inner.clock.now();
            let position = state.position(session);
            if position > 0 {
                return Admission {
                    position,
                    queue_length: state.len(),
                    acquired: position == 1,
                };
            }

            // Evict an expired holder before joining, so the arriving
            // session can be promoted immediately. At most one eviction per
            // admission; the next holder starts a fresh TTL window.
            if !state.is_empty() && self.inner.expired(&state, now) {
                if let Some(holder) = state.holder() {
                    info!("evicting expired holder {holder} of {file}");
                }
                state.dequeue(now);
                state.notify_all();
            }

            state.enqueue(session, now);
            let position = state.len();
            debug!("session {session} enqueued on {file} at position {position}");
            return Admission {
                position,
                queue_length: position,
                acquired: position == 1,
            };
        }
    }

    /// Release `file` if `session` is its current holder. Waiters are woken
    /// and the next in line becomes the holder as of this instant.
    pub async fn try_release(&self, file: &str, session: &str) -> bool {
        let Some(queue) = self.inner.get(file) else {
            return false;
        };
        let mut state = queue.state.lock().await;
        if state.retired || state.holder() != Some(session) {
            return false;
        }

        state.dequeue(self.inner.clock.now());
        state.notify_all();
        if state.is_empty() {
            state.retired = true;
            self.inner.queues.remove(file);
        }
        debug!("session {session} released {file}");
        true
    }

    /// Release every path held by `session` and drop it from any queue it
    /// is waiting on. Returns the number of paths it actually held.
    pub async fn release_all(&self, session: &str) -> usize {
        let files: Vec<String> = self.inner.queues.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;

        for file in files {
            let Some(queue) = self.inner.get(&file) else {
                continue;
            };
            let mut state = queue.state.lock().await;
            if state.retired {
                continue;
            }

            if state.holder() == Some(session) {
                state.dequeue(self.inner.clock.now());
                state.notify_all();
                released += 1;
                if state.is_empty() {
                    state.retired = true;
                    self.inner.queues.remove(&file);
                }
            } else {
                // Dropping a waiter shifts positions without exposing a new
                // head, so no wakeup is sent; waiters re-check on their
                // periodic tick.
                state.remove_waiter(session);
            }
        }

        if released > 0 {
            debug!("released {released} locks held by session {session}");
        }
        released
    }

    /// Current holder of `file`, if any.
    pub async fn holder(&self, file: &str) -> Option<String> {
        let queue = self.inner.get(file)?;
        let state = queue.state.lock().await;
        state.holder().map(str::to_string)
    }

    /// 1-indexed position of `session` on `file`; 0 when absent.
    pub async fn position(&self, file: &str, session: &str) -> usize {
        match self.inner.get(file) {
            Some(queue) => queue.state.lock().await.position(session),
            None => 0,
        }
    }

    /// Snapshot of the queue for `file`.
    pub async fn queue_info(&self, file: &str) -> Option<QueueInfo> {
        let queue = self.inner.get(file)?;
        let state = queue.state.lock().await;
        let holder = state.holder()?.to_string();
        let acquired_at = state.acquired_at()?;
        Some(QueueInfo {
            file: file.to_string(),
            holder,
            acquired_at,
            queue_length: state.len(),
            waiters: state.waiters(),
        })
    }

    /// One [`LockInfo`] per held path. Ordering across paths is unspecified.
    pub async fn all_locks(&self) -> Vec<LockInfo> {
        let files: Vec<String> = self.inner.queues.iter().map(|e| e.key().clone()).collect();
        let mut locks = Vec::with_capacity(files.len());
        for file in files {
            let Some(queue) = self.inner.get(&file) else {
                continue;
            };
            let state = queue.state.lock().await;
            if let (Some(holder), Some(acquired_at)) = (state.holder(), state.acquired_at()) {
                locks.push(LockInfo {
                    session: holder.to_string(),
                    file: file.clone(),
                    acquired_at,
                });
            }
        }
        locks
    }

    /// Snapshot of every live queue, waiters included.
    pub async fn all_queues(&self) -> Vec<QueueInfo> {
        let files: Vec<String> = self.inner.queues.iter().map(|e| e.key().clone()).collect();
        let mut queues = Vec::with_capacity(files.len());
        for file in files {
            if let Some(info) = self.queue_info(&file).await {
                queues.push(info);
            }
        }
        queues
    }

    /// Block until `session` is the holder of `file`.
    ///
    /// Returns `true` once the session reaches the head of its queue and
    /// `false` when it is not queued at all. Callers bound the wait by
    /// wrapping the future in `tokio::time::timeout` or by dropping it;
    /// neither removes the session from the queue.
    pub async fn wait_for_turn(&self, file: &str, session: &str) -> bool {
        loop {
            let Some(queue) = self.inner.get(file) else {
                return false;
            };
            let notified = {
                let state = queue.state.lock().await;
                match state.position(session) {
                    0 => return false,
                    1 => return true,
                    _ => state.notifier(),
                }
            };
            // The notifier was captured under the queue lock: any dequeue
            // from this point on signals it. The sleep covers the remaining
            // window between capture and await registration.
            tokio::select! {
                _ = notified.notified() => {}
                _ = tokio::time::sleep(RECHECK_INTERVAL) => {}
            }
        }
    }

    /// Stop the TTL sweeper. Dropping the store has the same effect.
    pub fn shutdown(&self) {
        self.sweeper.abort();
    }
}

impl Drop for LockStore {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl StoreInner {
    fn get(&self, file: &str) -> Option<Arc<FileQueue>> {
        self.queues.get(file).map(|entry| Arc::clone(entry.value()))
    }

    fn expired(&self, state: &QueueState, now: DateTime<Utc>) -> bool {
        match state.acquired_at() {
            Some(acquired_at) => now.signed_duration_since(acquired_at) > self.ttl,
            None => false,
        }
    }

    /// One sweep pass: evict at most one expired holder per queue and drop
    /// queues that end up empty. The freshly exposed head, if any, starts a
    /// new TTL window and is left for the next pass.
    async fn sweep_expired(&self) {
        let files: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for file in files {
            let Some(queue) = self.get(&file) else {
                continue;
            };
            let mut state = queue.state.lock().await;
            if state.retired {
                continue;
            }

            let now = self.clock.now();
            if !state.is_empty() && self.expired(&state, now) {
                if let Some(holder) = state.holder() {
                    info!("sweeper evicting expired holder {holder} of {file}");
                }
                state.dequeue(now);
                state.notify_all();
            }
            if state.is_empty() {
                state.retired = true;
                self.queues.remove(&file);
            }
        }
    }
}

async fn sweep_loop(inner: Weak<StoreInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.sweep_expired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn store() -> LockStore {
        LockStore::new(DEFAULT_TTL, DEFAULT_TTL)
    }

    fn store_with_clock(ttl: Duration, clock: &FakeClock) -> LockStore {
        // A sweep interval of one TTL keeps the sweeper out of the way.
        LockStore::with_clock(ttl, DEFAULT_TTL, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn single_acquire_takes_the_lock() {
        let store = store();

        let admission = store.enqueue_or_acquire("/f", "A").await;
        assert_eq!(
            admission,
            Admission {
                position: 1,
                queue_length: 1,
                acquired: true
            }
        );
        assert_eq!(store.holder("/f").await.as_deref(), Some("A"));
        assert_eq!(store.all_queues().await.len(), 1);
    }

    #[tokio::test]
    async fn second_session_joins_the_queue() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;

        let admission = store.enqueue_or_acquire("/f", "B").await;
        assert_eq!(
            admission,
            Admission {
                position: 2,
                queue_length: 2,
                acquired: false
            }
        );

        let info = store.queue_info("/f").await.expect("queue should exist");
        assert_eq!(info.holder, "A");
        assert_eq!(info.waiters, vec!["B".to_string()]);
        assert_eq!(info.queue_length, 2);
    }

    #[tokio::test]
    async fn release_promotes_the_next_in_line() {
        let clock = FakeClock::new();
        let store = store_with_clock(DEFAULT_TTL, &clock);
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        clock.advance(TimeDelta::seconds(30));
        assert!(store.try_release("/f", "A").await);

        assert_eq!(store.holder("/f").await.as_deref(), Some("B"));
        let info = store.queue_info("/f").await.expect("queue should exist");
        assert_eq!(info.acquired_at, clock.now());
    }

    #[tokio::test]
    async fn non_holder_cannot_release() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        assert!(!store.try_release("/f", "B").await);
        assert_eq!(store.holder("/f").await.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn readmission_is_idempotent() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        let again = store.enqueue_or_acquire("/f", "A").await;
        assert_eq!(
            again,
            Admission {
                position: 1,
                queue_length: 2,
                acquired: true
            }
        );
        let again = store.enqueue_or_acquire("/f", "B").await;
        assert_eq!(
            again,
            Admission {
                position: 2,
                queue_length: 2,
                acquired: false
            }
        );
    }

    #[tokio::test]
    async fn release_is_not_repeatable() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;

        assert!(store.try_release("/f", "A").await);
        assert!(!store.try_release("/f", "A").await);
        assert_eq!(store.holder("/f").await, None);
        assert!(store.all_locks().await.is_empty());
    }

    #[tokio::test]
    async fn expired_holder_is_evicted_on_arrival() {
        let clock = FakeClock::new();
        let store = store_with_clock(Duration::from_millis(50), &clock);
        store.enqueue_or_acquire("/f", "A").await;

        clock.advance(TimeDelta::milliseconds(100));
        let admission = store.enqueue_or_acquire("/f", "B").await;

        assert_eq!(
            admission,
            Admission {
                position: 1,
                queue_length: 1,
                acquired: true
            }
        );
        assert_eq!(store.holder("/f").await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn eviction_promotes_an_existing_waiter() {
        let clock = FakeClock::new();
        let store = store_with_clock(Duration::from_secs(60), &clock);
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        clock.advance(TimeDelta::seconds(61));
        let admission = store.enqueue_or_acquire("/f", "C").await;

        // A is evicted, B is promoted with a fresh TTL window, C queues.
        assert_eq!(
            admission,
            Admission {
                position: 2,
                queue_length: 2,
                acquired: false
            }
        );
        assert_eq!(store.holder("/f").await.as_deref(), Some("B"));
        let info = store.queue_info("/f").await.expect("queue should exist");
        assert_eq!(info.acquired_at, clock.now());
    }

    #[tokio::test]
    async fn holder_at_exactly_ttl_is_kept() {
        let clock = FakeClock::new();
        let store = store_with_clock(Duration::from_secs(60), &clock);
        store.enqueue_or_acquire("/f", "A").await;

        clock.advance(TimeDelta::seconds(60));
        let admission = store.enqueue_or_acquire("/f", "B").await;

        assert!(!admission.acquired);
        assert_eq!(store.holder("/f").await.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn release_all_counts_holders_only() {
        let store = store();
        store.enqueue_or_acquire("/1", "A").await;
        store.enqueue_or_acquire("/2", "A").await;
        store.enqueue_or_acquire("/3", "B").await;
        store.enqueue_or_acquire("/3", "A").await;

        assert_eq!(store.release_all("A").await, 2);

        assert_eq!(store.holder("/1").await, None);
        assert_eq!(store.holder("/2").await, None);
        assert_eq!(store.holder("/3").await.as_deref(), Some("B"));
        // A is gone from /3's queue as well, without having been "released".
        assert_eq!(store.position("/3", "A").await, 0);
    }

    #[tokio::test]
    async fn wait_for_turn_returns_after_release() {
        let store = Arc::new(store());
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_for_turn("/f", "B").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.try_release("/f", "A").await);

        let became_holder = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken promptly")
            .expect("waiter task should not panic");
        assert!(became_holder);
        assert_eq!(store.holder("/f").await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn wait_for_turn_outlives_a_caller_timeout() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), store.wait_for_turn("/f", "B")).await;
        assert!(outcome.is_err());

        // The timed-out waiter stays queued; clients retry or unlock-all.
        assert_eq!(store.position("/f", "B").await, 2);
    }

    #[tokio::test]
    async fn wait_for_turn_rejects_an_unqueued_session() {
        let store = store();
        assert!(!store.wait_for_turn("/f", "B").await);

        store.enqueue_or_acquire("/f", "A").await;
        assert!(!store.wait_for_turn("/f", "B").await);
    }

    #[tokio::test]
    async fn waiters_are_promoted_in_fifo_order() {
        let store = store();
        store.enqueue_or_acquire("/f", "A").await;
        for session in ["B", "C", "D"] {
            store.enqueue_or_acquire("/f", session).await;
        }

        for (leaving, next) in [("A", "B"), ("B", "C"), ("C", "D")] {
            assert!(store.try_release("/f", leaving).await);
            assert_eq!(store.holder("/f").await.as_deref(), Some(next));
        }

        assert!(store.try_release("/f", "D").await);
        assert!(store.all_queues().await.is_empty());
    }

    #[tokio::test]
    async fn sweeper_evicts_a_stale_holder() {
        let clock = FakeClock::new();
        let store = LockStore::with_clock(
            Duration::from_secs(30),
            Duration::from_millis(10),
            Arc::new(clock.clone()),
        );
        store.enqueue_or_acquire("/f", "A").await;

        clock.advance(TimeDelta::seconds(31));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.holder("/f").await, None);
        assert!(store.all_queues().await.is_empty());
    }

    #[tokio::test]
    async fn sweeper_promotes_a_waiter_behind_a_stale_holder() {
        let clock = FakeClock::new();
        let store = LockStore::with_clock(
            Duration::from_secs(30),
            Duration::from_millis(10),
            Arc::new(clock.clone()),
        );
        store.enqueue_or_acquire("/f", "A").await;
        store.enqueue_or_acquire("/f", "B").await;

        clock.advance(TimeDelta::seconds(31));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.holder("/f").await.as_deref(), Some("B"));
        assert_eq!(store.queue_info("/f").await.map(|q| q.queue_length), Some(1));
    }

    #[tokio::test]
    async fn views_cover_every_live_queue() {
        let store = store();
        store.enqueue_or_acquire("/a", "A").await;
        store.enqueue_or_acquire("/b", "B").await;
        store.enqueue_or_acquire("/b", "C").await;

        let locks = store.all_locks().await;
        assert_eq!(locks.len(), 2);
        let mut sessions: Vec<&str> = locks.iter().map(|l| l.session.as_str()).collect();
        sessions.sort_unstable();
        assert_eq!(sessions, vec!["A", "B"]);

        let queues = store.all_queues().await;
        assert_eq!(queues.len(), 2);
        let b = queues
            .iter()
            .find(|q| q.file == "/b")
            .expect("queue for /b should be listed");
        assert_eq!(b.holder, "B");
        assert_eq!(b.waiters, vec!["C".to_string()]);

        assert_eq!(store.queue_info("/missing").await, None);
    }
}
