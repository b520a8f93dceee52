//! Fixed-window counter record.

use std::time::Duration;

use tokio::time::Instant;

/// The count of events seen for one key inside its current window.
///
/// A record is created on the first event of a window and lapses at
/// `expires_at`; the next event after that starts a new record from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Events recorded in this window
    count: u64,
    /// When this window ends
    expires_at: Instant,
}

impl CounterRecord {
    /// Start a new window at `now`, with nothing counted yet.
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now + window,
        }
    }

    /// Record one event at `now` and return the count after it.
    ///
    /// If the window has lapsed, a fresh one is opened first.
    pub fn hit(&mut self, now: Instant, window: Duration) -> u64 {
        if self.is_expired(now) {
            *self = Self::new(now, window);
        }

        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
