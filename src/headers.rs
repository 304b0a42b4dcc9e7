use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Copies a single header value from `source` to `target` when present.
pub fn copy_if_present(source: &HeaderMap, target: &mut HeaderMap, name: &str) {
    let Ok(header_name) = name.parse::<HeaderName>() else {
        return;
    };
    if let Some(value) = source.get(&header_name) {
        target.insert(header_name, value.clone());
    }
}

/// Derives the forwarding-chain headers for an outbound request.
///
/// `X-Forwarded-For` relays the inbound chain verbatim, falling back to the
/// remote socket address. `X-Real-IP` is the first entry of the inbound
/// chain, with the same fallback.
pub fn apply_ip_headers(target: &mut HeaderMap, inbound: &HeaderMap, remote_ip: Option<IpAddr>) {
    let inbound_chain = inbound
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let socket_ip = remote_ip.map(|ip| ip.to_string());

    let forwarded_for = inbound_chain.map(str::to_string).or_else(|| socket_ip.clone());
    if let Some(value) = forwarded_for.as_deref().and_then(parse_value) {
        target.insert(FORWARDED_FOR_HEADER, value);
    }

    let real_ip = inbound_chain
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(socket_ip);
    if let Some(value) = real_ip.as_deref().and_then(parse_value) {
        target.insert(REAL_IP_HEADER, value);
    }
}

fn parse_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

/// Relay allow-list for upstream response headers. Everything not named
/// here (and not in `request_id_headers`) is dropped.
pub fn filter_response_headers(upstream: &HeaderMap, request_id_headers: &[&str]) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    copy_if_present(upstream, &mut filtered, "content-type");
    copy_if_present(upstream, &mut filtered, "content-length");
    for name in request_id_headers {
        copy_if_present(upstream, &mut filtered, name);
    }
    copy_if_present(upstream, &mut filtered, "retry-after");
    filtered
}

/// Inbound `X-Request-Id`, trimmed, or `-` for log correlation.
pub fn request_id_for_log(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("-")
        .to_string()
}

pub fn generate_request_id() -> String {
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("gw-{ts_ms}-{seq}")
}
