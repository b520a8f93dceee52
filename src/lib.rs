//! Turnstile - Request Rate Limiting Middleware
//!
//! This crate decides, per client IP or API token, whether a request may
//! proceed. Each key gets a fixed window in which a configured number of
//! requests is allowed; once the limit is passed the key stays blocked until
//! the window ends. Counts live behind the `CounterStore` trait, backed by
//! Redis for shared deployments or by process memory.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
