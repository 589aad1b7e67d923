//! Request identity resolution.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

/// Header carrying the proxy chain; the first hop is the original client.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Which socket peers may name the client through `X-Forwarded-For`.
///
/// The header is client-controlled, so it is ignored unless the request came
/// through a proxy that overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForwardedTrust {
    /// The socket peer is the client.
    #[default]
    Disabled,
    /// Honour the header from any peer.
    AnyPeer,
    /// Honour the header only when the socket peer is one of these proxies.
    Proxies(Vec<IpAddr>),
}

impl ForwardedTrust {
    pub fn from_config(enabled: bool, proxies: &[IpAddr]) -> Self {
        match (enabled, proxies.is_empty()) {
            (false, _) => ForwardedTrust::Disabled,
            (true, true) => ForwardedTrust::AnyPeer,
            (true, false) => ForwardedTrust::Proxies(proxies.to_vec()),
        }
    }

    pub fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match self {
            ForwardedTrust::Disabled => false,
            ForwardedTrust::AnyPeer => true,
            ForwardedTrust::Proxies(proxies) => peer.is_some_and(|p| proxies.contains(&p)),
        }
    }
}

/// Authenticated principal, inserted into request extensions by the
/// authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// Who is making a request, as far as admission control is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub principal_id: Option<String>,
    pub client_ip: Option<IpAddr>,
}

impl RequestIdentity {
    pub fn principal(id: impl Into<String>) -> Self {
        Self {
            principal_id: Some(id.into()),
            client_ip: None,
        }
    }

    pub fn anonymous(ip: IpAddr) -> Self {
        Self {
            principal_id: None,
            client_ip: Some(ip),
        }
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Identifier the window is counted under: `user:{id}`, `ip:{addr}` or
    /// `unknown`.
    pub fn identifier(&self) -> String {
        match (&self.principal_id, &self.client_ip) {
            (Some(id), _) => format!("user:{id}"),
            (None, Some(ip)) => format!("ip:{ip}"),
            (None, None) => "unknown".to_string(),
        }
    }

    /// Resolve identity from request headers and extensions.
    ///
    /// The client address is the socket peer, replaced by the first
    /// `X-Forwarded-For` hop only when `trust` accepts that peer.
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions, trust: &ForwardedTrust) -> Self {
        let principal_id = extensions.get::<Principal>().map(|p| p.0.clone());
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_ip = if trust.trusts(peer) {
            forwarded_client_ip(headers).or(peer)
        } else {
            peer
        };
        Self {
            principal_id,
            client_ip,
        }
    }
}

/// First hop of `X-Forwarded-For`, if present and parseable.
pub fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let raw = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    first
        .parse::<IpAddr>()
        .ok()
        .or_else(|| first.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identifier_precedence() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(RequestIdentity::principal("u1").with_client_ip(ip).identifier(), "user:u1");
        assert_eq!(RequestIdentity::anonymous(ip).identifier(), "ip:10.0.0.1");
        assert_eq!(RequestIdentity::default().identifier(), "unknown");
    }

    #[test]
    fn test_forwarded_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.2, 10.0.0.3"),
        );
        assert_eq!(
            forwarded_client_ip(&headers),
            Some("203.0.113.7".parse().unwrap())
        );

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.4:5123"));
        assert_eq!(
            forwarded_client_ip(&headers),
            Some("198.51.100.4".parse().unwrap())
        );

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("garbage"));
        assert_eq!(forwarded_client_ip(&headers), None);
    }

    fn parts(forwarded: &str, peer: &str) -> (HeaderMap, Extensions) {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(forwarded).unwrap());
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo::<SocketAddr>(peer.parse().unwrap()));
        (headers, extensions)
    }

    #[test]
    fn test_untrusted_header_is_ignored() {
        let (headers, mut extensions) = parts("203.0.113.9", "192.0.2.50:4000");
        extensions.insert(Principal("u42".into()));

        let identity = RequestIdentity::from_parts(&headers, &extensions, &ForwardedTrust::Disabled);
        assert_eq!(identity.principal_id.as_deref(), Some("u42"));
        assert_eq!(identity.client_ip, Some("192.0.2.50".parse().unwrap()));
    }

    #[test]
    fn test_trusted_proxy_header_is_used() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let trust = ForwardedTrust::from_config(true, &[proxy]);

        let (headers, extensions) = parts("203.0.113.9", "10.0.0.1:4000");
        let identity = RequestIdentity::from_parts(&headers, &extensions, &trust);
        assert_eq!(identity.client_ip, Some("203.0.113.9".parse().unwrap()));

        // Same header from a peer that is not a listed proxy.
        let (headers, extensions) = parts("203.0.113.9", "192.0.2.50:4000");
        let identity = RequestIdentity::from_parts(&headers, &extensions, &trust);
        assert_eq!(identity.client_ip, Some("192.0.2.50".parse().unwrap()));

        // Trusted peer without a usable header falls back to the peer.
        let (_, extensions) = parts("203.0.113.9", "10.0.0.1:4000");
        let identity = RequestIdentity::from_parts(&HeaderMap::new(), &extensions, &trust);
        assert_eq!(identity.client_ip, Some(proxy));
    }

    #[test]
    fn test_trust_from_config() {
        assert_eq!(ForwardedTrust::from_config(false, &[]), ForwardedTrust::Disabled);
        assert_eq!(ForwardedTrust::from_config(true, &[]), ForwardedTrust::AnyPeer);
        assert!(ForwardedTrust::AnyPeer.trusts(None));
        assert!(!ForwardedTrust::Proxies(vec!["10.0.0.1".parse().unwrap()]).trusts(None));
    }
}
