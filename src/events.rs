//! # Event schema
//!
//! Write-side records accepted by the store and the per-request metadata
//! (client address, user agent, session, page) attached to each of them.

use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::LazyLock;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::sanitize::{Payload, sanitize_text};

pub const MAX_EVENT_TYPE_LEN: usize = 50;
pub const MAX_IP_LEN: usize = 45;
pub const MAX_SESSION_LEN: usize = 100;
pub const MAX_URL_LEN: usize = 500;

/// Headers consulted for the client address, highest priority first.
const CLIENT_IP_HEADERS: [&str; 6] = [
    "cf-connecting-ip",
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

pub const SESSION_HEADER: &str = "x-session-id";
pub const PAGE_URL_HEADER: &str = "x-page-url";

static MOBILE_UA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)mobile|android|iphone|ipod|blackberry|iemobile|opera mini")
        .expect("mobile pattern is valid")
});
static TABLET_UA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tablet|ipad|kindle|silk").expect("tablet pattern is valid"));

/// Coarse device class derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    /// Mobile markers win over tablet markers; anything else is a desktop.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if MOBILE_UA.is_match(user_agent) {
            Self::Mobile
        } else if TABLET_UA.is_match(user_agent) {
            Self::Tablet
        } else {
            Self::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context captured from the HTTP request that produced a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Best-effort client address. Taken from spoofable headers, never trusted.
    pub actor_ip: String,
    pub user_agent: String,
    pub session_id: String,
    pub page_url: String,
    pub referrer: String,
}

impl RequestMetadata {
    /// Build metadata from raw request pieces.
    pub fn from_request(headers: &HeaderMap, request_uri: &str, peer: Option<SocketAddr>) -> Self {
        let session_id = header_text(headers, SESSION_HEADER)
            .map(|value| clamp(&value, MAX_SESSION_LEN))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("sess_{}", Uuid::new_v4().simple()));

        let page_url = headers
            .get(PAGE_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(request_uri);

        Self {
            actor_ip: clamp(&client_ip(headers, peer), MAX_IP_LEN),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            session_id,
            page_url: clamp(page_url, MAX_URL_LEN),
            referrer: headers
                .get(header::REFERER)
                .and_then(|value| value.to_str().ok())
                .map(|value| clamp(value, MAX_URL_LEN))
                .unwrap_or_default(),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType::from_user_agent(&self.user_agent)
    }
}

impl<S> FromRequestParts<S> for RequestMetadata
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Ok(Self::from_request(&parts.headers, request_uri, peer))
    }
}

/// First public address found in the proxy headers, else the socket peer,
/// else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in CLIENT_IP_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        for candidate in value.split(',') {
            if let Ok(ip) = candidate.trim().parse::<IpAddr>()
                && is_public(&ip)
            {
                return ip.to_string();
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rejects private and reserved ranges.
fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_v4(&mapped);
            }
            let first = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || (first == 0x2001 && v6.segments()[1] == 0x0db8))
        }
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        || a >= 240
        || (a == 100 && (64..128).contains(&b)))
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(sanitize_text)
}

/// Truncate to at most `max` characters.
pub fn clamp(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((index, _)) => value[..index].to_string(),
        None => value.to_string(),
    }
}

/// An analytics event ready to be stored.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: Payload,
    pub meta: RequestMetadata,
}

/// One chatbot exchange.
#[derive(Debug, Clone)]
pub struct NewChatInteraction {
    pub user_message: String,
    pub bot_response: String,
    pub response_time_ms: i32,
    pub meta: RequestMetadata,
}

/// A heatmap / interaction sample.
#[derive(Debug, Clone)]
pub struct NewInteractionSample {
    pub interaction_type: String,
    pub payload: Payload,
    pub page_url: String,
    pub viewport_width: i32,
    pub viewport_height: i32,
    pub device_type: DeviceType,
    pub meta: RequestMetadata,
}

impl NewInteractionSample {
    /// Derive page and viewport from the payload (`page`, `viewport_width`,
    /// `viewport_height`), falling back to the request metadata.
    pub fn from_payload(interaction_type: String, payload: Payload, meta: RequestMetadata) -> Self {
        let dimension = |key: &str| {
            payload
                .get(key)
                .and_then(|value| value.as_i64())
                .and_then(|value| i32::try_from(value).ok())
                .unwrap_or(0)
        };
        let page_url = payload
            .get("page")
            .and_then(|value| value.as_str())
            .filter(|page| !page.is_empty())
            .map(|page| clamp(page, MAX_URL_LEN))
            .unwrap_or_else(|| meta.page_url.clone());

        Self {
            viewport_width: dimension("viewport_width"),
            viewport_height: dimension("viewport_height"),
            device_type: meta.device_type(),
            interaction_type,
            page_url,
            payload,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn device_type_prefers_mobile_markers() {
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (Linux; Android 14; Tablet)"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPad; CPU OS 17_0)"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"),
            DeviceType::Desktop
        );
        assert_eq!(DeviceType::from_user_agent(""), DeviceType::Desktop);
    }

    #[test]
    fn client_ip_follows_header_priority() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.9"),
            ("cf-connecting-ip", "198.51.100.7"),
        ]);
        assert_eq!(client_ip(&map, None), "198.51.100.7");
    }

    #[test]
    fn client_ip_skips_private_entries_in_lists() {
        let map = headers(&[("x-forwarded-for", "10.0.0.1, 192.168.1.4 ,8.8.8.8")]);
        assert_eq!(client_ip(&map, None), "8.8.8.8");
    }

    #[test]
    fn client_ip_falls_back_to_peer_then_unknown() {
        let map = headers(&[("x-forwarded-for", "127.0.0.1, not-an-ip")]);
        let peer: SocketAddr = "10.1.2.3:5555".parse().unwrap();

        assert_eq!(client_ip(&map, Some(peer)), "10.1.2.3");
        assert_eq!(client_ip(&map, None), "unknown");
    }

    #[test]
    fn client_ip_accepts_public_ipv6() {
        let map = headers(&[("client-ip", "fd00::1, 2606:4700:4700::1111")]);
        assert_eq!(client_ip(&map, None), "2606:4700:4700::1111");
    }

    #[test]
    fn metadata_reads_session_page_and_referrer() {
        let map = headers(&[
            ("x-session-id", "abc123"),
            ("x-page-url", "/pricing"),
            ("referer", "https://example.com/"),
            ("user-agent", "Mozilla/5.0 (iPad)"),
        ]);
        let meta = RequestMetadata::from_request(&map, "/ajax", None);

        assert_eq!(meta.session_id, "abc123");
        assert_eq!(meta.page_url, "/pricing");
        assert_eq!(meta.referrer, "https://example.com/");
        assert_eq!(meta.device_type(), DeviceType::Tablet);
    }

    #[test]
    fn metadata_generates_session_and_uses_request_uri() {
        let meta = RequestMetadata::from_request(&HeaderMap::new(), "/ajax?x=1", None);

        assert!(meta.session_id.starts_with("sess_"));
        assert_eq!(meta.page_url, "/ajax?x=1");
        assert_eq!(meta.referrer, "");
        assert_eq!(meta.actor_ip, "unknown");
    }

    #[test]
    fn clamp_counts_characters() {
        assert_eq!(clamp("ñandú", 3), "ñan");
        assert_eq!(clamp("ab", 5), "ab");
        assert_eq!(clamp(&"x".repeat(600), MAX_URL_LEN).len(), MAX_URL_LEN);
    }

    #[test]
    fn sample_takes_page_and_viewport_from_payload() {
        let meta = RequestMetadata::from_request(&HeaderMap::new(), "/ajax", None);
        let payload = sanitize(&json!({
            "page": "/checkout",
            "viewport_width": 1280,
            "viewport_height": "720",
        }));

        let sample = NewInteractionSample::from_payload("click".into(), payload, meta);
        assert_eq!(sample.page_url, "/checkout");
        assert_eq!(sample.viewport_width, 1280);
        assert_eq!(sample.viewport_height, 720);
        assert_eq!(sample.device_type, DeviceType::Desktop);
    }
}
