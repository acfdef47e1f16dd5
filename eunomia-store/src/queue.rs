// SPDX-FileCopyrightText: 2026 The eunomia authors
// SPDX-License-Identifier: MIT

//! Per-path FIFO queue state.
//!
//! Each locked path is backed by one [`FileQueue`]: an ordered list of
//! sessions whose head is the current holder, plus a replaceable wakeup
//! primitive for blocked waiters. All state lives behind a single
//! `tokio::sync::Mutex`, the queue's exclusion token; the store locks it
//! around every read and write.

use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

/// One session's place in a queue.
#[derive(Debug, Clone)]
pub(crate) struct QueueEntry {
    pub(crate) session: String,
    pub(crate) enqueued_at: DateTime<Utc>,
}

/// FIFO queue for a single path. The head entry is the current holder.
#[derive(Debug)]
pub(crate) struct FileQueue {
    pub(crate) state: Mutex<QueueState>,
}

impl FileQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct QueueState {
    entries: Vec<QueueEntry>,
    notify: Arc<Notify>,
    /// Set once, under the queue lock, when the emptied queue is dropped
    /// from the store's map. A task that fetched the `Arc` before removal
    /// must not operate on it; admission retries against the map instead.
    pub(crate) retired: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            notify: Arc::new(Notify::new()),
            retired: false,
        }
    }

    /// Append `session` with the given enqueue instant.
    ///
    /// Callers check `position(session) == 0` first; a session is never
    /// queued twice on the same path.
    pub(crate) fn enqueue(&mut self, session: &str, now: DateTime<Utc>) {
        self.entries.push(QueueEntry {
            session: session.to_string(),
            enqueued_at: now,
        });
    }

    /// Remove the head. The newly exposed head (if any) has its
    /// `enqueued_at` rewritten to `now`: acquisition time is the moment a
    /// session became the holder, not the moment it joined the queue.
    pub(crate) fn dequeue(&mut self, now: DateTime<Utc>) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.remove(0);
        if let Some(head) = self.entries.first_mut() {
            head.enqueued_at = now;
        }
    }

    /// Remove a waiting (non-head) entry. The holder is never removed by
    /// this path; release goes through `dequeue`.
    pub(crate) fn remove_waiter(&mut self, session: &str) -> bool {
        match self.entries.iter().position(|e| e.session == session) {
            Some(index) if index > 0 => {
                self.entries.remove(index);
                true
            }
            _ => false,
        }
    }

    /// 1-indexed position of `session`; 1 is the holder, 0 means absent.
    pub(crate) fn position(&self, session: &str) -> usize {
        self.entries
            .iter()
            .position(|e| e.session == session)
            .map_or(0, |index| index + 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn holder(&self) -> Option<&str> {
        self.entries.first().map(|e| e.session.as_str())
    }

    /// Instant the current holder became the holder.
    pub(crate) fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.enqueued_at)
    }

    /// Sessions waiting behind the holder, in FIFO order.
    pub(crate) fn waiters(&self) -> Vec<String> {
        self.entries.iter().skip(1).map(|e| e.session.clone()).collect()
    }

    /// Swap in a fresh wakeup primitive and signal the old one, waking every
    /// waiter that captured it. Runs under the queue lock, so a waiter has
    /// either captured the old primitive (and is woken) or will observe the
    /// new queue state on its next pass.
    pub(crate) fn notify_all(&mut self) {
        let old = mem::replace(&mut self.notify, Arc::new(Notify::new()));
        old.notify_waiters();
    }

    /// Current wakeup primitive. Captured under the queue lock before
    /// awaiting, never after.
    pub(crate) fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}
