//! Lexical SSRF guard for snapshot targets.
//!
//! The guard inspects the URL exactly as parsed: IP literals (including the
//! numeric forms the URL parser normalizes, such as `0x7f.1`) and reserved
//! hostnames. It does not resolve DNS; see [`crate::resolve`] for the
//! resolution-time check that closes that gap.

use backpocket_common::BlockedReason;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

const BLOCKED_SUFFIXES: [&str; 3] = [".local", ".internal", ".localhost"];

/// Decides whether a URL may be fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostGuard {
    allow_private: bool,
}

impl HostGuard {
    /// Guard that refuses private and internal targets.
    pub fn strict() -> Self {
        Self {
            allow_private: false,
        }
    }

    /// Guard that only validates URL shape. Local development and tests.
    pub fn permissive() -> Self {
        Self {
            allow_private: true,
        }
    }

    pub fn new(allow_private: bool) -> Self {
        Self { allow_private }
    }

    pub fn allows_private(&self) -> bool {
        self.allow_private
    }

    /// Parse and validate a saved URL.
    ///
    /// ```
    /// use backpocket_common::BlockedReason;
    /// use backpocket_http::guard::HostGuard;
    ///
    /// let guard = HostGuard::strict();
    /// assert!(guard.check("https://example.com/article").is_ok());
    /// assert_eq!(guard.check("not a url"), Err(BlockedReason::InvalidUrl));
    /// assert_eq!(guard.check("http://192.168.1.5/page"), Err(BlockedReason::SsrfBlocked));
    /// ```
    pub fn check(&self, raw: &str) -> Result<Url, BlockedReason> {
        let url = Url::parse(raw.trim()).map_err(|_| BlockedReason::InvalidUrl)?;
        self.check_url(&url)?;
        Ok(url)
    }

    /// Validate an already parsed URL, e.g. a redirect hop.
    pub fn check_url(&self, url: &Url) -> Result<(), BlockedReason> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BlockedReason::InvalidUrl);
        }
        let host = url.host().ok_or(BlockedReason::InvalidUrl)?;
        if !self.allow_private && is_blocked_host(&host) {
            return Err(BlockedReason::SsrfBlocked);
        }
        Ok(())
    }
}

pub fn is_blocked_host(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(ip) => is_blocked_ip(IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_blocked_ip(IpAddr::V6(*ip)),
        Host::Domain(name) => is_blocked_hostname(name),
    }
}

pub fn is_blocked_hostname(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    if name == "localhost" {
        return true;
    }
    // Non-special schemes leave IP literals as domains.
    if let Ok(ip) = name.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return is_blocked_ip(ip);
    }
    BLOCKED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Loopback, unspecified, private, and link-local addresses.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.octets()[0] == 0
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(raw: &str) -> bool {
        HostGuard::strict().check(raw) == Err(BlockedReason::SsrfBlocked)
    }

    #[test]
    fn blocks_loopback_and_unspecified() {
        assert!(blocked("http://localhost/"));
        assert!(blocked("http://LOCALHOST:8080/x"));
        assert!(blocked("http://127.0.0.1/"));
        assert!(blocked("http://127.8.9.10/"));
        assert!(blocked("http://0.0.0.0/"));
        assert!(blocked("http://[::1]/"));
        assert!(blocked("http://[::]/"));
    }

    #[test]
    fn blocks_private_ranges() {
        for raw in [
            "http://10.0.0.1/",
            "http://10.255.255.255/",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "http://192.168.0.1/",
            "http://192.168.1.5/page",
            "http://169.254.169.254/latest/meta-data/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:10.0.0.1]/",
        ] {
            assert!(blocked(raw), "{raw} should be blocked");
        }
    }

    #[test]
    fn allows_public_neighbours_of_private_ranges() {
        let guard = HostGuard::strict();
        for raw in [
            "http://172.15.0.1/",
            "http://172.32.0.1/",
            "http://11.0.0.1/",
            "http://192.169.0.1/",
            "https://93.184.216.34/",
            "https://[2606:2800:220:1::]/",
        ] {
            assert!(guard.check(raw).is_ok(), "{raw} should be allowed");
        }
    }

    #[test]
    fn blocks_reserved_suffixes() {
        assert!(blocked("http://printer.local/"));
        assert!(blocked("http://metadata.google.internal/"));
        assert!(blocked("http://app.localhost/"));
        assert!(blocked("http://db.internal./"));
        assert!(!blocked("https://local.example.com/"));
        assert!(!blocked("https://internal.example.com/"));
    }

    #[test]
    fn numeric_host_forms_are_normalized_before_checking() {
        assert!(blocked("http://0x7f.1/"));
        assert!(blocked("http://2130706433/"));
    }

    #[test]
    fn invalid_or_unsupported_urls() {
        let guard = HostGuard::strict();
        assert_eq!(guard.check(""), Err(BlockedReason::InvalidUrl));
        assert_eq!(guard.check("example.com/no-scheme"), Err(BlockedReason::InvalidUrl));
        assert_eq!(guard.check("ftp://example.com/file"), Err(BlockedReason::InvalidUrl));
        assert_eq!(guard.check("file:///etc/passwd"), Err(BlockedReason::InvalidUrl));
    }

    #[test]
    fn permissive_guard_still_validates_shape() {
        let guard = HostGuard::permissive();
        assert!(guard.check("http://127.0.0.1:8080/").is_ok());
        assert_eq!(guard.check("nope"), Err(BlockedReason::InvalidUrl));
    }
}
