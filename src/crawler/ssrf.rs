//! SSRF guard: scheme and resolved-address validation before any request

use crate::state::Coordination;
use crate::ErrorCode;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;
use url::{Host, Url};

/// Reasons a URL is refused before any network I/O
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SsrfError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Scheme not allowed: {0}")]
    SchemeNotAllowed(String),

    #[error("Unable to resolve host: {0}")]
    Unresolvable(String),

    #[error("Host {host} resolves to blocked address {ip}")]
    BlockedAddress { host: String, ip: IpAddr },
}

impl SsrfError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl(_) => ErrorCode::InvalidUrl,
            _ => ErrorCode::SsrfBlocked,
        }
    }
}

/// Validates outbound URLs against private, loopback, link-local,
/// multicast and reserved address ranges
///
/// Resolved addresses are cached per host in [`Coordination::dns`]. Every
/// address a host resolves to must be public; one private record is enough
/// to reject it.
pub struct SsrfGuard {
    coordination: Arc<Coordination>,
    allow_private: bool,
}

impl SsrfGuard {
    /// # Arguments
    ///
    /// * `coordination` - Shared state holding the DNS cache
    /// * `allow_private` - Skip the address range check (test servers only)
    pub fn new(coordination: Arc<Coordination>, allow_private: bool) -> Self {
        Self {
            coordination,
            allow_private,
        }
    }

    /// Validates a URL before it is fetched
    ///
    /// # Returns
    ///
    /// * `Ok(Url)` - The parsed URL, safe to request
    /// * `Err(SsrfError)` - `InvalidUrl` maps to `INVALID_URL`, every other
    ///   variant to `SSRF_BLOCKED`
    pub async fn validate(&self, url: &str) -> Result<Url, SsrfError> {
        let parsed = Url::parse(url).map_err(|e| SsrfError::InvalidUrl(format!("{}: {}", url, e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(SsrfError::SchemeNotAllowed(parsed.scheme().to_string()));
        }

        let host = match parsed.host() {
            Some(host) => host.to_owned(),
            None => return Err(SsrfError::InvalidUrl(format!("{}: missing host", url))),
        };

        let host_name = parsed.host_str().unwrap_or_default().to_string();
        let addresses = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => {
                let port = parsed.port_or_known_default().unwrap_or(80);
                self.resolve(&domain, port).await.to_vec()
            }
        };

        if addresses.is_empty() {
            return Err(SsrfError::Unresolvable(host_name));
        }

        if !self.allow_private {
            if let Some(ip) = addresses.iter().find(|ip| is_blocked_ip(ip)) {
                return Err(SsrfError::BlockedAddress {
                    host: host_name,
                    ip: *ip,
                });
            }
        }

        Ok(parsed)
    }

    /// Resolves `host` through the shared DNS cache
    async fn resolve(&self, host: &str, port: u16) -> Arc<Vec<IpAddr>> {
        let key = host.to_lowercase();
        if let Some(cached) = self.coordination.dns.get(&key) {
            return cached;
        }

        let addresses: Vec<IpAddr> = match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => {
                let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                ips.sort();
                ips.dedup();
                ips
            }
            Err(e) => {
                tracing::debug!("DNS lookup failed for {}: {}", host, e);
                Vec::new()
            }
        };

        let addresses = Arc::new(addresses);
        self.coordination.dns.insert(key, Arc::clone(&addresses));
        addresses
    }
}

/// Returns true if `ip` is in a range outbound requests must never reach
///
/// IPv4: 0.0.0.0/8, 10/8, 127/8, 169.254/16, 172.16/12, 192.168/16,
/// 224/4 and 240/4. IPv6: `::`, `::1`, `fc00::/7`, `fe80::/10` and
/// IPv4-mapped forms of the IPv4 ranges.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || a >= 224
}

fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(&v4);
    }

    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
