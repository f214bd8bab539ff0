//! Client identity extraction.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;

/// Identity used when nothing about the request identifies the client.
/// Such requests are counted together rather than bypassing the limiter.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Client address resolved by an upstream layer (for example a trusted proxy
/// handler). Takes precedence over every other source when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Derive the admission identity for a request.
///
/// Sources in order: an explicit [`ClientIp`] extension, the first entry of
/// `X-Forwarded-For`, the connection's peer address, and finally
/// [`UNKNOWN_IDENTITY`].
pub fn client_identity(request: &Request) -> String {
    if let Some(ClientIp(ip)) = request.extensions().get::<ClientIp>() {
        return ip.to_string();
    }

    if let Some(forwarded) = forwarded_for(request.headers()) {
        return forwarded;
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    UNKNOWN_IDENTITY.to_string()
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request() -> Request {
        axum::http::Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[test]
    fn test_explicit_client_ip_wins() {
        let mut req = request();
        req.headers_mut()
            .insert("x-forwarded-for", "9.9.9.9".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));
        req.extensions_mut().insert(ClientIp([1, 2, 3, 4].into()));

        assert_eq!(client_identity(&req), "1.2.3.4");
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let mut req = request();
        req.headers_mut()
            .insert("x-forwarded-for", " 203.0.113.7 , 10.0.0.2".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));

        assert_eq!(client_identity(&req), "203.0.113.7");
    }

    #[test]
    fn test_empty_forwarded_for_is_ignored() {
        let mut req = request();
        req.headers_mut().insert("x-forwarded-for", "".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));

        assert_eq!(client_identity(&req), "10.0.0.1");
    }

    #[test]
    fn test_connection_address() {
        let mut req = request();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51000))));

        assert_eq!(client_identity(&req), "192.168.1.20");
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(client_identity(&request()), UNKNOWN_IDENTITY);
    }
}
