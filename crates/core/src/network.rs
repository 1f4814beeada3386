//! Client address handling.

use std::net::{IpAddr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::error::CoreError;

/// Location label for addresses that never leave the local network.
pub const LOCAL_NETWORK: &str = "Local Network";

/// Location label when a lookup is disabled, fails, or times out.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Address recorded when the client address cannot be determined.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Whether `ip` is private, loopback, link-local or unspecified.
///
/// Unparsable input is not local; callers resolve it to [`UNKNOWN_LOCATION`].
pub fn is_local_address(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_address(&v4.to_string()),
            None => v6.is_loopback() || v6.is_unspecified() || is_local_v6(&v6),
        },
        Err(_) => false,
    }
}

/// fc00::/7 (unique local) and fe80::/10 (link local).
fn is_local_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Forwarding headers seen on a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardingHeaders<'a> {
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
}

fn is_trusted(ip: IpAddr, trusted: &[IpNetwork]) -> bool {
    trusted.iter().any(|net| net.contains(ip))
}

fn parse_hop(raw: &str) -> Option<IpAddr> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// Resolve the originating client of a request whose socket peer is `peer`.
///
/// Forwarding headers are only believed when the peer is one of the
/// `trusted` proxies. `X-Forwarded-For` is then walked right to left, each
/// proxy having appended the address it saw, and the first hop outside
/// `trusted` is the client. A malformed hop ends the walk. If every hop is a
/// trusted proxy, the left-most one is used. Without `X-Forwarded-For`, a
/// trusted peer's `X-Real-IP` is used.
///
/// Returns `None` only when the peer itself is unknown.
pub fn resolve_client(
    peer: Option<IpAddr>,
    headers: ForwardingHeaders<'_>,
    trusted: &[IpNetwork],
) -> Option<IpAddr> {
    let peer = peer?.to_canonical();
    if !is_trusted(peer, trusted) {
        return Some(peer);
    }

    if let Some(chain) = headers.forwarded_for {
        let mut left_most_proxy = None;
        for hop in chain.rsplit(',') {
            let Some(ip) = parse_hop(hop) else { break };
            if !is_trusted(ip, trusted) {
                return Some(ip);
            }
            left_most_proxy = Some(ip);
        }
        return Some(left_most_proxy.unwrap_or(peer));
    }

    Some(headers.real_ip.and_then(parse_hop).unwrap_or(peer))
}

/// Validate an operator-supplied address and return its canonical form.
pub fn canonical_ip(raw: &str) -> Result<String, CoreError> {
    raw.trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| CoreError::Validation(format!("'{raw}' is not a valid IP address")))
}
