//! Client IP resolution.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Header set by proxies listing the client and each hop, client first.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header set by proxies carrying the single client address.
pub const X_REAL_IP: &str = "x-real-ip";

/// Resolve the IP a request should be counted against.
///
/// With `trust_proxy_headers` set, the left-most `X-Forwarded-For` entry wins,
/// then `X-Real-IP`; otherwise, or when neither is present, the host part of
/// the socket address is used. Header values are taken as given and are not
/// checked to be addresses, so a client talking to the service directly can
/// pick its own key unless a proxy rewrites them.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<&str>,
    trust_proxy_headers: bool,
) -> Option<String> {
    if trust_proxy_headers {
        if let Some(forwarded) = header_value(headers, X_FORWARDED_FOR) {
            let first = forwarded.split(',').next().unwrap_or_default().trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }

        if let Some(real_ip) = header_value(headers, X_REAL_IP) {
            return Some(real_ip.to_string());
        }
    }

    remote_addr.and_then(host_from_remote_addr)
}

/// Strip the port from a `host:port` socket address.
pub fn host_from_remote_addr(addr: &str) -> Option<String> {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Some(socket.ip().to_string());
    }

    let (host, _port) = addr.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
