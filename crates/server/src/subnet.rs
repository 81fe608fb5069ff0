//! Trusted-subnet check for batch updates.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Net {
    /// Whether `ip` belongs to this network. IPv6 addresses are never
    /// members of an IPv4 network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(ip) = ip else {
            return false;
        };
        let mask = self.mask();
        u32::from(ip) & mask == u32::from(self.addr) & mask
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }
}

impl FromStr for Ipv4Net {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("{s:?}: expected CIDR notation"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| format!("{s:?}: bad address: {e}"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| format!("{s:?}: bad prefix: {e}"))?;
        if prefix > 32 {
            return Err(format!("{s:?}: prefix out of range"));
        }
        Ok(Self { addr, prefix })
    }
}

impl std::fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// The verdict for a request, given an optional header value.
///
/// Absent or unparseable addresses pass; the guard only rejects addresses
/// that positively parse outside the network.
pub fn permits(net: &Ipv4Net, header: Option<&str>) -> bool {
    match header.and_then(|h| h.trim().parse::<IpAddr>().ok()) {
        Some(ip) => net.contains(ip),
        None => true,
    }
}
