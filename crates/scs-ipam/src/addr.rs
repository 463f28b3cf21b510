//! IPv4 arithmetic for the per-/24 index layout.

use std::net::Ipv4Addr;

use scs_core::error::{Result, ScsError};
use scs_store::entities::Network;
use scs_store::Record;

/// Fixed-width octal rendering of an address, used as the index row key so
/// that lexicographic order is numeric order.
pub fn octal_key(ip: Ipv4Addr) -> String {
    format!("{:012o}", u32::from(ip))
}

/// Inverse of [`octal_key`].
pub fn from_octal_key(key: &str) -> Result<Ipv4Addr> {
    u32::from_str_radix(key, 8)
        .map(Ipv4Addr::from)
        .map_err(|_| ScsError::validation(format!("bad octal address key '{}'", key)))
}

/// The /24 slice an address belongs to, i.e. `a.b.c.0`.
pub fn slice_of(ip: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & 0xffff_ff00)
}

/// Network base address honoring the configured cidr.
pub fn network_base(net: &Network) -> Result<Ipv4Addr> {
    let base: Ipv4Addr = net
        .network
        .parse()
        .map_err(|_| ScsError::validation(format!("network '{}' has bad address", net.key())))?;
    Ok(Ipv4Addr::from(u32::from(base) & mask_bits(net.cidr)))
}

/// Broadcast address of a network.
pub fn broadcast(net: &Network) -> Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(u32::from(network_base(net)?) | !mask_bits(net.cidr)))
}

/// Every /24 slice a network spans. Networks smaller than a /24 round up
/// to the single slice containing them.
pub fn slices(net: &Network) -> Result<Vec<Ipv4Addr>> {
    let base = u32::from(network_base(net)?);
    if net.cidr >= 24 {
        return Ok(vec![Ipv4Addr::from(base & 0xffff_ff00)]);
    }
    let count = 1u32 << (24 - net.cidr);
    Ok((0..count).map(|i| Ipv4Addr::from(base + (i << 8))).collect())
}

/// All host addresses of a network, excluding the network address and the
/// broadcast.
pub fn host_range(net: &Network) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let base = u32::from(network_base(net)?);
    let bcast = u32::from(broadcast(net)?);
    if bcast - base < 2 {
        return Err(ScsError::validation(format!(
            "network '{}' has no assignable host addresses",
            net.key()
        )));
    }
    Ok((Ipv4Addr::from(base + 1), Ipv4Addr::from(bcast - 1)))
}

fn mask_bits(cidr: u8) -> u32 {
    u32::MAX.checked_shl(32 - cidr as u32).unwrap_or(0)
}

/// Parse a range given as `start end` or `start/cidr`.
pub fn parse_range(start: &str, end: Option<&str>) -> Result<(Ipv4Addr, Ipv4Addr)> {
    if let Some((addr, cidr)) = start.split_once('/') {
        if end.is_some() {
            return Err(ScsError::validation("give either start/cidr or start and end, not both"));
        }
        let base: Ipv4Addr = addr
            .parse()
            .map_err(|_| ScsError::validation(format!("'{}' is not a dotted-quad address", addr)))?;
        let cidr: u8 = cidr
            .parse()
            .ok()
            .filter(|c| *c <= 32)
            .ok_or_else(|| ScsError::validation(format!("bad cidr '/{}'", cidr)))?;
        let bits = mask_bits(cidr);
        let lo = u32::from(base) & bits;
        let hi = lo | !bits;
        return Ok((Ipv4Addr::from(lo), Ipv4Addr::from(hi)));
    }
    let lo: Ipv4Addr = start
        .parse()
        .map_err(|_| ScsError::validation(format!("'{}' is not a dotted-quad address", start)))?;
    let hi: Ipv4Addr = end
        .ok_or_else(|| ScsError::validation("range requires an end address or a /cidr"))?
        .parse()
        .map_err(|_| ScsError::validation("range end is not a dotted-quad address"))?;
    if u32::from(hi) < u32::from(lo) {
        return Err(ScsError::validation("range end precedes range start"));
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net24() -> Network {
        test_net("10.0.0.0", 24)
    }

    pub(crate) fn test_net(network: &str, cidr: u8) -> Network {
        Network {
            location: "nyc".to_string(),
            zone: "internal".to_string(),
            alias: "servers".to_string(),
            network: network.to_string(),
            mask: "255.255.255.0".to_string(),
            cidr,
            gateway: String::new(),
            static_routes: false,
            dns: String::new(),
            vlan: String::new(),
            description: String::new(),
            repo_addr: String::new(),
            repo_fs_path: String::new(),
            repo_url: String::new(),
            build_net: false,
            default_build: false,
            ntp: String::new(),
            dhcp: String::new(),
        }
    }

    #[test]
    fn test_octal_key_roundtrip_and_order() {
        let a: Ipv4Addr = "10.0.0.9".parse().unwrap();
        let b: Ipv4Addr = "10.0.0.10".parse().unwrap();
        assert_eq!(from_octal_key(&octal_key(a)).unwrap(), a);
        assert!(octal_key(a) < octal_key(b));
        assert_eq!(octal_key(a).len(), 12);
    }

    #[test]
    fn test_slice_of() {
        let ip: Ipv4Addr = "10.1.2.200".parse().unwrap();
        assert_eq!(slice_of(ip), "10.1.2.0".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_slices_for_wide_network() {
        let net = test_net("10.0.0.0", 22);
        let s = slices(&net).unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s[0], "10.0.0.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s[3], "10.0.3.0".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_slices_round_up_small_network() {
        let net = test_net("10.0.0.64", 26);
        let s = slices(&net).unwrap();
        assert_eq!(s, vec!["10.0.0.0".parse::<Ipv4Addr>().unwrap()]);
    }

    #[test]
    fn test_broadcast_and_host_range() {
        let net = net24();
        assert_eq!(broadcast(&net).unwrap(), "10.0.0.255".parse::<Ipv4Addr>().unwrap());
        let (lo, hi) = host_range(&net).unwrap();
        assert_eq!(lo, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(hi, "10.0.0.254".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_parse_range_forms() {
        let (lo, hi) = parse_range("10.0.0.1", Some("10.0.0.10")).unwrap();
        assert_eq!(lo, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(hi, "10.0.0.10".parse::<Ipv4Addr>().unwrap());

        let (lo, hi) = parse_range("10.0.0.0/30", None).unwrap();
        assert_eq!(lo, "10.0.0.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(hi, "10.0.0.3".parse::<Ipv4Addr>().unwrap());

        assert!(parse_range("10.0.0.1", None).is_err());
        assert!(parse_range("10.0.0.0/30", Some("10.0.0.9")).is_err());
        assert!(parse_range("10.0.0.10", Some("10.0.0.1")).is_err());
    }
}
