//! Core rate decision engine.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::backend::CounterStore;
use super::key::RateKey;
use crate::config::RateLimitingConfig;
use crate::error::{Result, TurnstileError};

/// Limits the engine applies, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSettings {
    /// Requests allowed per window for callers identified by IP
    pub limit_by_ip: u64,
    /// Requests allowed per window for callers presenting a token
    pub limit_by_token: u64,
    /// Window width, and therefore the lockout once a limit is passed
    pub block_duration: Duration,
}

impl From<&RateLimitingConfig> for LimitSettings {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            limit_by_ip: config.limit_by_ip,
            limit_by_token: config.limit_by_token,
            block_duration: config.block_duration(),
        }
    }
}

/// The rate decision engine.
///
/// Picks the key and limit for a request and delegates the counting to a
/// `CounterStore`. It keeps no state of its own, so one instance can be shared
/// across every request-handling task without locking.
pub struct RateLimiter {
    /// Where counts are kept
    store: Arc<dyn CounterStore>,
    /// Configured limits
    settings: LimitSettings,
}

impl RateLimiter {
    /// Create a new rate limiter over `store`.
    ///
    /// Fails if the block duration is zero, since a zero-width window would
    /// never count anything.
    pub fn new(store: Arc<dyn CounterStore>, settings: LimitSettings) -> Result<Self> {
        if settings.block_duration.is_zero() {
            return Err(TurnstileError::InvalidConfiguration(
                "block duration must be greater than zero".to_string(),
            ));
        }

        Ok(Self { store, settings })
    }

    /// Decide whether a request from `ip`, optionally carrying `token`, may proceed.
    ///
    /// A non-empty token is counted against `limit_by_token`; otherwise the IP
    /// is counted against `limit_by_ip`. Token and IP counters never share a
    /// store key. The store's answer, or its error, is returned unchanged.
    pub async fn check_rate_limit(&self, ip: &str, token: Option<&str>) -> Result<bool> {
        let key = RateKey::select(ip, token);
        let limit = self.limit_for(&key);

        trace!(key = %key, limit = limit, "Checking rate limit");

        self.store
            .allow(&key.storage_key(), limit, self.settings.block_duration)
            .await
    }

    /// The limit applied to a key.
    pub fn limit_for(&self, key: &RateKey) -> u64 {
        if key.is_token() {
            self.settings.limit_by_token
        } else {
            self.settings.limit_by_ip
        }
    }
}
