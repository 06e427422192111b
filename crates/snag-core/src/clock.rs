//! Logical clock used to stamp `updatedAt` / `deletedAt` at the call site.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::models::Timestamp;

/// Source of logical timestamps
pub trait Clock: Send + Sync {
    /// Current logical time in Unix milliseconds
    fn now(&self) -> Timestamp;
}

/// Wall clock in Unix milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock that never repeats or goes backwards within a process.
///
/// Two local edits in the same millisecond still get distinct, ordered
/// timestamps, which keeps last-writer-wins deterministic for them.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let wall = SystemClock.now();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        wall.max(previous.saturating_add(1))
    }
}

/// Manually driven clock for tests and deterministic replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub const fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, value: Timestamp) {
        self.now.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Timestamp) -> Timestamp {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
