//! Request interceptor that applies the rate limiter to every route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, instrument, warn};

use super::client_ip::resolve_client_ip;
use crate::config::{FailureMode, ServerConfig};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::RateLimiter;

/// Body sent with a 429 response.
pub const TOO_MANY_REQUESTS_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Outcome of intercepting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request
    Allow,
    /// The caller is over its limit
    Deny,
    /// The decision could not be made
    Error,
    /// No client address could be determined
    Unidentified,
    /// The token header is present but not readable text
    MalformedToken,
}

/// Extracts the caller's identity from a request and asks the limiter about it.
pub struct Interceptor {
    /// The rate decision engine
    limiter: Arc<RateLimiter>,
    /// Header carrying the caller's API token
    token_header: HeaderName,
    /// Whether proxy headers may name the client IP
    trust_proxy_headers: bool,
    /// Policy when the limiter fails
    failure_mode: FailureMode,
}

impl Interceptor {
    /// Create a new interceptor from server settings.
    pub fn new(limiter: Arc<RateLimiter>, config: &ServerConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes()).map_err(|_| {
            TurnstileError::InvalidConfiguration(format!(
                "token_header {:?} is not a valid header name",
                config.token_header
            ))
        })?;

        Ok(Self {
            limiter,
            token_header,
            trust_proxy_headers: config.trust_proxy_headers,
            failure_mode: config.failure_mode,
        })
    }

    /// Decide what to do with a request given its headers and socket address.
    pub async fn inspect(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Verdict {
        let remote = remote_addr.map(|addr| addr.to_string());
        let Some(ip) = resolve_client_ip(headers, remote.as_deref(), self.trust_proxy_headers)
        else {
            warn!("Could not determine client address");
            return Verdict::Unidentified;
        };

        let token = match headers.get(&self.token_header).map(|value| value.to_str()) {
            Some(Ok(token)) => Some(token),
            Some(Err(_)) => {
                warn!(ip = %ip, "Token header is not valid text");
                return Verdict::MalformedToken;
            }
            None => None,
        };

        match self.limiter.check_rate_limit(&ip, token).await {
            Ok(true) => Verdict::Allow,
            Ok(false) => {
                debug!(ip = %ip, token = token.is_some(), "Rate limit exceeded");
                Verdict::Deny
            }
            Err(e) => {
                error!(error = %e, failure_mode = ?self.failure_mode, "Rate limit check failed");
                match self.failure_mode {
                    FailureMode::Closed => Verdict::Error,
                    FailureMode::Open => Verdict::Allow,
                }
            }
        }
    }
}

/// axum middleware wrapping every route with the interceptor.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit(
    State(interceptor): State<Arc<Interceptor>>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let verdict = interceptor.inspect(request.headers(), remote_addr).await;
    match verdict {
        Verdict::Allow => next.run(request).await,
        Verdict::Deny => (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_MESSAGE).into_response(),
        Verdict::Error => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
        Verdict::Unidentified => {
            (StatusCode::BAD_REQUEST, "unable to determine client address").into_response()
        }
        Verdict::MalformedToken => {
            (StatusCode::BAD_REQUEST, "token header must be visible ASCII").into_response()
        }
    }
}
