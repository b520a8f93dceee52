//! Counter store trait for abstracting in-memory and networked implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TurnstileError};

/// Trait for counter store implementations.
///
/// This trait abstracts over the process-local `MemoryStore` and the shared
/// `RedisStore` so the `RateLimiter` can work with either.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one event for `key` and report whether it is still within `limit`.
    ///
    /// The first event of a fresh window creates a record with a count of one
    /// that expires `window` later. Every further event before expiry increments
    /// the count, and the call is allowed while `count <= limit`. Once the count
    /// passes the limit the key stays denied until the record expires. The
    /// increment and the comparison happen as one indivisible step per key.
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool>;
}

/// Check the arguments every store requires before touching state.
pub(crate) fn validate_request(key: &str, window: Duration) -> Result<()> {
    if key.is_empty() {
        return Err(TurnstileError::InvalidConfiguration(
            "rate key must not be empty".to_string(),
        ));
    }

    if window.is_zero() {
        return Err(TurnstileError::InvalidConfiguration(
            "window must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
