use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

use crate::error::ScanError;

/// Finds the local IPv4 address a scan should be anchored on.
pub trait NetworkLocator: Send + Sync {
    fn local_ipv4(&self) -> Result<Ipv4Addr, ScanError>;
}

/// Uses the address of the default-route interface, falling back to the
/// first non-loopback IPv4 interface address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocator;

impl NetworkLocator for SystemLocator {
    fn local_ipv4(&self) -> Result<Ipv4Addr, ScanError> {
        if let Some(ip) = default_route_ipv4() {
            return Ok(ip);
        }
        debug!("default route lookup failed, falling back to interface list");

        let ifaces = get_if_addrs().map_err(|e| ScanError::NetworkUnreachable(e.to_string()))?;
        ifaces
            .into_iter()
            .filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_link_local() => Some(v4.ip),
                _ => None,
            })
            .next()
            .ok_or_else(|| ScanError::NetworkUnreachable("no non-loopback IPv4 address".into()))
    }
}

/// Source address the kernel would pick for outbound traffic. Connecting a
/// UDP socket sends no packets.
fn default_route_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

/// Convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24)
        .map(|n| n.trunc())
        .unwrap_or_else(|_| Ipv4Net::from(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cidr_from_ipv4() {
        let cidr = ipv4_to_default_cidr(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(cidr.to_string(), "10.1.2.0/24");
    }
}
