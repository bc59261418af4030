//! Run statistics: process-wide counters shared by every worker
//!
//! Counters live behind a single mutex so increments are atomic
//! read-modify-write and a snapshot is a consistent point-in-time view.
//! Raw fields are never exposed to concurrent writers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    messages: u64,
    conversations: u64,
    attachments: u64,
}

/// Aggregated counters for one run, safe for concurrent increment from all
/// workers
#[derive(Debug)]
pub struct RunStatistics {
    inner: Mutex<Counters>,
    started: Instant,
}

/// Consistent point-in-time view of [`RunStatistics`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsSnapshot {
    /// Total messages archived
    pub messages: u64,
    /// Total conversation documents written
    pub conversations: u64,
    /// Total attachments downloaded (deduplicated skips not counted)
    pub attachments: u64,
    /// Wall-clock time since the run started
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Messages archived per second of elapsed time
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages as f64 / secs
        } else {
            0.0
        }
    }
}

impl RunStatistics {
    /// Create a fresh set of counters; the elapsed clock starts now
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Add `count` archived messages
    pub fn add_messages(&self, count: u64) {
        self.lock().messages += count;
    }

    /// Count one written conversation document
    pub fn add_conversation(&self) {
        self.lock().conversations += 1;
    }

    /// Count one downloaded attachment
    pub fn add_attachment(&self) {
        self.lock().attachments += 1;
    }

    /// Consistent snapshot of every counter plus elapsed time
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            messages: inner.messages,
            conversations: inner.conversations,
            attachments: inner.attachments,
            elapsed: self.started.elapsed(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // A poisoned lock means a panic while holding a counter increment;
        // the counters themselves are still coherent integers
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}
