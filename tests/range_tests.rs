use std::net::Ipv4Addr;

use proxy_scan_rs::range::{validate, AddrRange};

#[test]
fn dash_form_parses_and_counts_inclusively() {
    let r = AddrRange::parse("192.168.1.10-192.168.1.13").unwrap();
    assert_eq!(r.start(), Ipv4Addr::new(192, 168, 1, 10));
    assert_eq!(r.end(), Ipv4Addr::new(192, 168, 1, 13));
    assert_eq!(r.total(), 4);
}

#[test]
fn cidr_form_spans_network_to_broadcast() {
    let r = AddrRange::parse("10.1.2.0/29").unwrap();
    assert_eq!(r.start(), Ipv4Addr::new(10, 1, 2, 0));
    assert_eq!(r.end(), Ipv4Addr::new(10, 1, 2, 7));
    assert_eq!(r.total(), 8);
}

#[test]
fn iteration_crosses_octet_boundaries_ascending() {
    let r = AddrRange::parse("10.0.255.254-10.1.0.1").unwrap();
    let ips: Vec<Ipv4Addr> = r.iter().collect();
    assert_eq!(
        ips,
        vec![
            Ipv4Addr::new(10, 0, 255, 254),
            Ipv4Addr::new(10, 0, 255, 255),
            Ipv4Addr::new(10, 1, 0, 0),
            Ipv4Addr::new(10, 1, 0, 1),
        ]
    );
}

#[test]
fn inverted_endpoints_are_reported_not_swapped() {
    let r = AddrRange::parse("10.0.0.5-10.0.0.1").unwrap();
    assert!(r.is_inverted());
    assert_eq!(r.total(), 0);
    // Endpoints stay exactly as given; the caller decides whether to swap.
    assert_eq!(r.start(), Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(r.end(), Ipv4Addr::new(10, 0, 0, 1));
}

#[test]
fn validate_is_usable_standalone() {
    let summary = validate("192.168.0.1", "192.168.0.255").unwrap();
    assert!(!summary.inverted);
    assert_eq!(summary.total, 255);

    let inverted = validate("192.168.0.9", "192.168.0.1").unwrap();
    assert!(inverted.inverted);
    assert_eq!(inverted.total, 0);

    assert!(validate("999.1.1.1", "10.0.0.1").is_err());
    assert!(validate("10.0.0.1", "").is_err());
}

#[test]
fn garbage_input_is_rejected() {
    assert!(AddrRange::parse("").is_err());
    assert!(AddrRange::parse("10.0.0.1").is_err());
    assert!(AddrRange::parse("10.0.0.1-10.0.0").is_err());
    assert!(AddrRange::parse("hosts.txt").is_err());
}
