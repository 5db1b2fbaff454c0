//! SSRF guard shared by the HTTP and DNS probes.
//!
//! Parses a user-supplied URL/hostname, resolves it, and rejects any
//! resolved address that falls in a loopback, link-local, multicast,
//! unspecified, private, or cloud-metadata range, unless the caller
//! explicitly allows private addresses (used by tests and by on-prem
//! deployments that intentionally target internal hosts).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use trust_dns_resolver::TokioAsyncResolver;
use url::Url;

const METADATA_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata.google.internal",
    "metadata.azure.com",
];

const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("missing host")]
    MissingHost,
    #[error("hostname '{0}' is blocked")]
    BlockedHostname(String),
    #[error("address {0} resolves to a disallowed range")]
    BlockedAddress(IpAddr),
    #[error("DNS resolution failed: {0}")]
    ResolutionFailed(String),
}

/// Returns `true` when `addr` falls in a loopback / link-local / multicast /
/// unspecified / private / cloud-metadata range.
pub fn is_blocked_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
                || v4.is_private()
                || v4 == METADATA_V4
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || is_unique_local(v6)
                || is_link_local_v6(v6)
        }
    }
}

fn is_unique_local(addr: Ipv6Addr) -> bool {
    // fc00::/7
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(addr: Ipv6Addr) -> bool {
    // fe80::/10
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

fn is_blocked_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    METADATA_HOSTNAMES.iter().any(|h| *h == host)
}

/// Validate a URL against the SSRF policy. `allow_private` bypasses address
/// range checks (never bypasses hostname blocklisting) and exists only for
/// tests and explicitly-trusted internal targets.
pub async fn guard_url(
    resolver: &TokioAsyncResolver,
    raw_url: &str,
    allow_private: bool,
) -> Result<Url, SsrfError> {
    let url = Url::parse(raw_url).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(SsrfError::UnsupportedScheme(other.to_string())),
    }

    let host = url.host_str().ok_or(SsrfError::MissingHost)?;
    if is_blocked_hostname(host) {
        return Err(SsrfError::BlockedHostname(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if !allow_private && is_blocked_address(ip) {
            return Err(SsrfError::BlockedAddress(ip));
        }
        return Ok(url);
    }

    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| SsrfError::ResolutionFailed(e.to_string()))?;

    for ip in lookup.iter() {
        if !allow_private && is_blocked_address(ip) {
            return Err(SsrfError::BlockedAddress(ip));
        }
    }

    Ok(url)
}

/// Same policy, applied directly to a resolved/parsed socket address —
/// used by the TCP and DNS-custom-resolver probes which never build a URL.
pub fn guard_socket_addr(addr: SocketAddr, allow_private: bool) -> Result<(), SsrfError> {
    if !allow_private && is_blocked_address(addr.ip()) {
        return Err(SsrfError::BlockedAddress(addr.ip()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_metadata() {
        assert!(is_blocked_address("127.0.0.1".parse().unwrap()));
        assert!(is_blocked_address("169.254.169.254".parse().unwrap()));
        assert!(is_blocked_address("::1".parse().unwrap()));
        assert!(is_blocked_address("fe80::1".parse().unwrap()));
        assert!(is_blocked_address("fc00::1".parse().unwrap()));
        assert!(is_blocked_address("fd12:3456::1".parse().unwrap()));
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(is_blocked_address("10.0.0.1".parse().unwrap()));
        assert!(is_blocked_address("172.16.0.1".parse().unwrap()));
        assert!(is_blocked_address("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!is_blocked_address("8.8.8.8".parse().unwrap()));
        assert!(!is_blocked_address("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn blocks_localhost_by_name() {
        assert!(is_blocked_hostname("localhost"));
        assert!(is_blocked_hostname("LOCALHOST"));
        assert!(is_blocked_hostname("metadata.google.internal"));
        assert!(!is_blocked_hostname("example.test"));
    }

    #[tokio::test]
    async fn guard_url_rejects_literal_metadata_ip() {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap();
        let err = guard_url(&resolver, "http://169.254.169.254/latest/meta-data/", false)
            .await
            .unwrap_err();
        assert_eq!(err, SsrfError::BlockedAddress("169.254.169.254".parse().unwrap()));
    }

    #[tokio::test]
    async fn guard_url_rejects_bad_scheme() {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap();
        let err = guard_url(&resolver, "ftp://example.test/", false).await.unwrap_err();
        assert_eq!(err, SsrfError::UnsupportedScheme("ftp".to_string()));
    }
}
