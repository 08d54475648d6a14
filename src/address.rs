//! Source address checks for incoming webhook calls.

use ipnet::IpNet;
use std::net::IpAddr;

/// Network Bitbucket delivers webhooks from.
pub const BITBUCKET_NETWORK: &str = "104.192.143.0/24";

const BITBUCKET_PREFIX: &str = "104.192.143.";

/// Returns true if `address` is a dotted-decimal address inside
/// [`BITBUCKET_NETWORK`].
///
/// The text is matched as is: surrounding whitespace and IPv6 forms are
/// rejected. The last octet may carry one leading zero (`104.192.143.07`).
/// Callers pass addresses from [`resolve_client_address`], which are already
/// in canonical IPv4 form.
pub fn is_allowed_source(address: &str) -> bool {
    address
        .strip_prefix(BITBUCKET_PREFIX)
        .is_some_and(is_last_octet)
}

fn is_last_octet(octet: &str) -> bool {
    if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if octet.len() == 3 && octet.starts_with('0') {
        return false;
    }
    octet.parse::<u16>().is_ok_and(|value| value <= 255)
}

/// Works out the client address of a request that may have passed through
/// reverse proxies.
///
/// Starting at the socket peer, each hop that is a trusted proxy is replaced
/// by the next `X-Forwarded-For` entry from the right. Resolution stops at the
/// first untrusted hop, or at the leftmost entry when every hop is trusted.
pub fn resolve_client_address(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted_proxies: &[IpNet],
) -> Option<IpAddr> {
    let mut current = peer.map(|ip| ip.to_canonical())?;
    let Some(header) = forwarded_for else {
        return Some(current);
    };

    let mut hops = header.rsplit(',').map(str::trim).filter(|hop| !hop.is_empty());
    while is_trusted(current, trusted_proxies) {
        match hops.next().and_then(|hop| hop.parse::<IpAddr>().ok()) {
            Some(next) => current = next.to_canonical(),
            None => break,
        }
    }
    Some(current)
}

fn is_trusted(ip: IpAddr, trusted_proxies: &[IpNet]) -> bool {
    trusted_proxies.iter().any(|net| net.contains(&ip))
}
