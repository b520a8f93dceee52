//! Process-local counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::{validate_request, CounterStore};
use super::counter::CounterRecord;
use crate::error::Result;

/// A counter store that keeps every record in this process.
///
/// Each key's record lives in a `DashMap` shard; the shard's write lock is held
/// for the whole increment-and-compare, so concurrent events on one key are
/// serialized without any engine-side locking. Counts are not shared between
/// processes, so this store suits single-instance deployments and tests.
pub struct MemoryStore {
    /// Counter records indexed by rate key
    records: DashMap<String, CounterRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Get the current count for a key, ignoring lapsed records.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.count())
    }

    /// Drop every record whose window has ended.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let removed = before.saturating_sub(self.records.len());

        if removed > 0 {
            debug!(removed = removed, "Purged expired counter records");
        }
        removed
    }

    /// Get the number of records held, including lapsed ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool> {
        validate_request(key, window)?;

        let now = Instant::now();
        let count = {
            let mut record = self
                .records
                .entry(key.to_string())
                .or_insert_with(|| CounterRecord::new(now, window));
            record.hit(now, window)
        };

        trace!(key = %key, count = count, limit = limit, "Recorded event");

        Ok(count <= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TurnstileError;
    use futures::future::join_all;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit_then_denies() {
        let store = MemoryStore::new();

        for i in 1..=3 {
            assert!(store.allow("k", 3, WINDOW).await.unwrap(), "event {} should pass", i);
        }

        for _ in 0..5 {
            assert!(!store.allow("k", 3, WINDOW).await.unwrap());
        }
        assert_eq!(store.count("k"), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_lasts_until_window_expires() {
        let store = MemoryStore::new();

        assert!(store.allow("k", 1, WINDOW).await.unwrap());
        assert!(!store.allow("k", 1, WINDOW).await.unwrap());

        tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
        assert!(!store.allow("k", 1, WINDOW).await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.allow("k", 1, WINDOW).await.unwrap());
        assert_eq!(store.count("k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denials_do_not_extend_window() {
        let store = MemoryStore::new();

        assert!(store.allow("k", 1, WINDOW).await.unwrap());
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!store.allow("k", 1, WINDOW).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.allow("k", 1, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let store = MemoryStore::new();

        for key in ["a", "b", "c"] {
            assert!(!store.allow(key, 0, WINDOW).await.unwrap());
            assert!(!store.allow(key, 0, WINDOW).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();

        assert!(store.allow("a", 1, WINDOW).await.unwrap());
        assert!(!store.allow("a", 1, WINDOW).await.unwrap());
        assert!(store.allow("b", 1, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_empty_key_and_zero_window() {
        let store = MemoryStore::new();

        let result = store.allow("", 1, WINDOW).await;
        assert!(matches!(result, Err(TurnstileError::InvalidConfiguration(_))));

        let result = store.allow("k", 1, Duration::ZERO).await;
        assert!(matches!(result, Err(TurnstileError::InvalidConfiguration(_))));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let n = 200;

        let tasks = (0..n).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.allow("shared", n, WINDOW).await.unwrap() })
        });
        let results = join_all(tasks).await;

        let accepted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(accepted as u64, n);
        assert_eq!(store.count("shared"), Some(n));

        // One past the limit is the first denial.
        assert!(!store.allow("shared", n, WINDOW).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_past_limit_accept_exactly_limit() {
        let store = Arc::new(MemoryStore::new());

        let tasks = (0..100).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.allow("hot", 10, WINDOW).await.unwrap() })
        });
        let accepted = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(store.count("hot"), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();

        store.allow("old", 5, Duration::from_secs(1)).await.unwrap();
        store.allow("new", 5, WINDOW).await.unwrap();
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.count("old"), None);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count("new"), Some(1));
    }
}
