//! Origin checks for the inbound tool endpoint.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Whether an `Origin` header value names the local machine.
///
/// Accepts `http`/`https` origins whose host is exactly `localhost`,
/// `127.0.0.1` or `[::1]`, on any port. Hosts are compared after URL
/// parsing, so `localhost.evil.com` and `127.0.0.1.evil.com` do not pass.
pub fn is_allowed_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip == Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(ip)) => ip == Ipv6Addr::LOCALHOST,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_origins_allowed() {
        assert!(is_allowed_origin("http://localhost:3000"));
        assert!(is_allowed_origin("http://127.0.0.1:8080"));
        assert!(is_allowed_origin("http://[::1]:3000"));
        assert!(is_allowed_origin("https://localhost"));
    }

    #[test]
    fn test_lookalike_hosts_rejected() {
        assert!(!is_allowed_origin("http://localhost.evil.com"));
        assert!(!is_allowed_origin("http://127.0.0.1.evil.com"));
        assert!(!is_allowed_origin("http://evil.com"));
        assert!(!is_allowed_origin("http://evil-localhost"));
        assert!(!is_allowed_origin("http://localhost@evil.com"));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(!is_allowed_origin("not-a-url"));
        assert!(!is_allowed_origin(""));
        assert!(!is_allowed_origin("null"));
        assert!(!is_allowed_origin("ftp://localhost"));
        assert!(!is_allowed_origin("file:///etc/passwd"));
    }
}
