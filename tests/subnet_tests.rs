use std::net::Ipv4Addr;

use wifi_manager_rs::subnet::{compute_range, ipv4_to_default_cidr, NetworkRange, RangeView};

fn prefix_mask(prefix: u32) -> Ipv4Addr {
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ipv4Addr::from(bits)
}

#[test]
fn access_point_default_mask() {
    let r = compute_range("192.168.4.1", "255.255.255.240").unwrap();
    assert_eq!(r.to_string(), "192.168.4.0 - 192.168.4.15");
    assert_eq!(r.subnet_mask, Ipv4Addr::new(255, 255, 255, 240));
}

#[test]
fn station_address_in_upper_block() {
    let r = compute_range("192.168.1.37", "255.255.255.240").unwrap();
    assert_eq!(r.network_address, Ipv4Addr::new(192, 168, 1, 32));
    assert_eq!(r.broadcast_address, Ipv4Addr::new(192, 168, 1, 47));
    assert!(r.contains(Ipv4Addr::new(192, 168, 1, 40)));
    assert!(!r.contains(Ipv4Addr::new(192, 168, 1, 48)));
}

#[test]
fn range_brackets_address_for_every_prefix() {
    let addrs = [
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(172, 16, 200, 77),
        Ipv4Addr::new(192, 168, 4, 255),
        Ipv4Addr::new(255, 255, 255, 255),
        Ipv4Addr::new(0, 0, 0, 0),
    ];
    for ip in addrs {
        for prefix in 0..=32 {
            let mask = prefix_mask(prefix);
            let r = compute_range(&ip.to_string(), &mask.to_string()).unwrap();
            let (n, b, m) = (
                u32::from(r.network_address),
                u32::from(r.broadcast_address),
                u32::from(mask),
            );
            assert!(n <= u32::from(ip) && u32::from(ip) <= b, "{ip}/{prefix}");
            assert_eq!(n & m, n, "{ip}/{prefix}");
            assert_eq!(b | !m, b, "{ip}/{prefix}");
            assert_eq!(r.prefix_len(), Some(prefix as u8));
        }
    }
}

#[test]
fn full_mask_collapses_to_the_address() {
    let r = compute_range("10.9.8.7", "255.255.255.255").unwrap();
    assert_eq!(r.network_address, r.broadcast_address);
    assert_eq!(r.network_address, Ipv4Addr::new(10, 9, 8, 7));
}

#[test]
fn malformed_inputs_are_rejected() {
    let bad = [
        ("192.168.4", "255.255.255.0"),
        ("192.168.4.1", "255.255.255"),
        ("192.168.4.300", "255.255.255.0"),
        ("a.b.c.d", "255.255.255.0"),
        ("192.168.4.1", ""),
        ("192.168.4.1/24", "255.255.255.0"),
        ("+1.2.3.4", "255.255.255.0"),
    ];
    for (ip, mask) in bad {
        let err = compute_range(ip, mask).unwrap_err();
        assert!(!err.reason.is_empty(), "{ip} {mask}");
    }
}

#[test]
fn unknown_range_is_explicit() {
    let view = RangeView::resolve("", "255.255.255.240");
    assert_eq!(view, RangeView::Unknown);
    assert_eq!(view.to_string(), "--");
    assert_eq!(RangeView::default(), RangeView::Unknown);
}

#[test]
fn hosts_match_host_count() {
    let r = NetworkRange::from_addrs(Ipv4Addr::new(192, 168, 4, 9), prefix_mask(28));
    assert_eq!(r.hosts().count() as u32, r.host_count());
    assert_eq!(r.hosts().next(), Some(Ipv4Addr::new(192, 168, 4, 1)));
    assert_eq!(r.hosts().last(), Some(Ipv4Addr::new(192, 168, 4, 14)));
}

#[test]
fn default_cidr_is_24() {
    let cidr = ipv4_to_default_cidr(Ipv4Addr::new(192, 168, 42, 99)).unwrap();
    assert_eq!(cidr.to_string(), "192.168.42.0/24");
}
