use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use serde::Serialize;

use crate::error::InvalidInputError;

/// Network and broadcast addresses of the subnet an address lives in.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    pub network_address: Ipv4Addr,
    pub broadcast_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
}

/// Parse `ip` and `mask` as dotted-quad IPv4 and derive the range both describe.
///
/// For example `192.168.4.10` with the device's default access-point mask
/// `255.255.255.240` gives `192.168.4.0 - 192.168.4.15`.
/// Any input that is not four decimal octets in `0..=255` is rejected.
pub fn compute_range(ip: &str, mask: &str) -> Result<NetworkRange, InvalidInputError> {
    let ip = parse_ipv4(ip)?;
    let mask = parse_ipv4(mask)?;
    Ok(NetworkRange::from_addrs(ip, mask))
}

/// Strict dotted-quad parser: exactly four octets, each a decimal number in `0..=255`.
pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr, InvalidInputError> {
    let invalid = |reason: String| InvalidInputError {
        input: input.to_string(),
        reason,
    };

    let parts: Vec<&str> = input.trim().split('.').collect();
    if parts.len() != 4 {
        return Err(invalid(format!("expected 4 octets, found {}", parts.len())));
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        let part = part.trim();
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!("octet {part:?} is not a decimal number")));
        }
        *slot = part
            .parse::<u8>()
            .map_err(|_| invalid(format!("octet {part} is outside 0-255")))?;
    }
    Ok(Ipv4Addr::from(octets))
}

impl NetworkRange {
    pub fn from_addrs(ip: Ipv4Addr, mask: Ipv4Addr) -> Self {
        let ip = u32::from(ip);
        let mask = u32::from(mask);
        let network = ip & mask;
        let broadcast = network | !mask;
        Self {
            network_address: Ipv4Addr::from(network),
            broadcast_address: Ipv4Addr::from(broadcast),
            subnet_mask: Ipv4Addr::from(mask),
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let n = u32::from(ip);
        u32::from(self.network_address) <= n && n <= u32::from(self.broadcast_address)
    }

    /// Addresses strictly between network and broadcast.
    pub fn host_count(&self) -> u32 {
        let start = u32::from(self.network_address);
        let end = u32::from(self.broadcast_address);
        end.saturating_sub(start).saturating_sub(1)
    }

    /// Usable host addresses, network and broadcast excluded.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let start = u32::from(self.network_address);
        let end = u32::from(self.broadcast_address);
        // Too small to have host addresses when end <= start + 1
        (start.saturating_add(1)..end).map(Ipv4Addr::from)
    }

    /// CIDR prefix length, only defined for contiguous masks.
    pub fn prefix_len(&self) -> Option<u8> {
        ipnet::ipv4_mask_to_prefix(self.subnet_mask).ok()
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.network_address, self.broadcast_address)
    }
}

/// A range, or the explicit "we can't tell" value shown as `--`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RangeView {
    Known(NetworkRange),
    #[default]
    Unknown,
}

impl RangeView {
    /// Degrade calculator errors to `Unknown`; callers never see them.
    pub fn resolve(ip: &str, mask: &str) -> Self {
        match compute_range(ip, mask) {
            Ok(range) => RangeView::Known(range),
            Err(e) => {
                tracing::debug!("range unknown: {e}");
                RangeView::Unknown
            }
        }
    }

    pub fn known(&self) -> Option<&NetworkRange> {
        match self {
            RangeView::Known(r) => Some(r),
            RangeView::Unknown => None,
        }
    }
}

impl fmt::Display for RangeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeView::Known(r) => r.fmt(f),
            RangeView::Unknown => f.write_str("--"),
        }
    }
}

/// Local non-loopback IPv4 interfaces whose /24 network contains `device_ip`.
///
/// An empty result usually means this machine has not joined the device's
/// access point (or the station network the device is on).
pub fn local_networks_containing(device_ip: Ipv4Addr) -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            if let Some(cidr) = ipv4_to_default_cidr(ip) {
                if cidr.contains(&device_ip) {
                    set.insert(cidr);
                }
            }
        }
    }
    let mut cidrs: Vec<Ipv4Net> = set.into_iter().collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(cidrs)
}

/// Convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Option<Ipv4Net> {
    Ipv4Net::new(ip, 24).ok().map(|n| n.trunc())
}
