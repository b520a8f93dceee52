//! HTTP surface: the request interceptor, health endpoint and server.

mod client_ip;
mod health;
mod middleware;
mod server;

pub use client_ip::{host_from_remote_addr, resolve_client_ip, X_FORWARDED_FOR, X_REAL_IP};
pub use health::{healthz, HealthStatus};
pub use middleware::{rate_limit, Interceptor, Verdict, TOO_MANY_REQUESTS_MESSAGE};
pub use server::{router, HttpServer, HEALTHZ_PATH};
