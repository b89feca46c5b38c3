use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Result, ScanError};

/// Inclusive interval of IPv4 addresses.
///
/// The endpoints are kept exactly as given: an inverted interval (`end` below
/// `start`) is a reportable state, never silently swapped. The caller decides
/// whether to flip and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

/// Derived state of one range, produced by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSummary {
    pub inverted: bool,
    /// Number of candidate addresses; 0 when the range is inverted.
    pub total: u64,
}

impl AddrRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    /// Parse `A.B.C.D-A.B.C.E` or CIDR notation (`10.0.0.0/29`, expanded to
    /// the network..broadcast inclusive interval).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('/') {
            let net: Ipv4Net = s
                .parse()
                .map_err(|_| ScanError::InvalidAddress(format!("invalid CIDR: {s}")))?;
            return Ok(Self::new(net.network(), net.broadcast()));
        }
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| ScanError::InvalidAddress(format!("expected START-END, got: {s}")))?;
        Ok(Self::new(parse_addr(a.trim())?, parse_addr(b.trim())?))
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    pub fn is_inverted(&self) -> bool {
        u32::from(self.end) < u32::from(self.start)
    }

    /// Candidate count: `end - start + 1`, or 0 for an inverted range.
    pub fn total(&self) -> u64 {
        if self.is_inverted() {
            0
        } else {
            u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
        }
    }

    pub fn summary(&self) -> RangeSummary {
        RangeSummary {
            inverted: self.is_inverted(),
            total: self.total(),
        }
    }

    /// Addresses in strictly ascending order. Empty for inverted ranges.
    pub fn iter(&self) -> AddrIter {
        AddrIter {
            next: u64::from(u32::from(self.start)),
            last: if self.is_inverted() {
                0
            } else {
                u64::from(u32::from(self.end)) + 1
            },
        }
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Ascending cursor over a range; this is the only per-address state the
/// scheduler keeps, regardless of range size.
#[derive(Debug, Clone)]
pub struct AddrIter {
    next: u64,
    last: u64,
}

impl Iterator for AddrIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next >= self.last {
            return None;
        }
        let addr = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(addr)
    }
}

/// Side-effect-free validation of textual endpoints, usable for live UI
/// checks without starting a scan.
pub fn validate(start: &str, end: &str) -> Result<RangeSummary> {
    let range = AddrRange::new(parse_addr(start.trim())?, parse_addr(end.trim())?);
    Ok(range.summary())
}

fn parse_addr(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| ScanError::InvalidAddress(format!("invalid IPv4 address: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_counts_inclusive_endpoints() {
        let r = AddrRange::parse("192.168.1.1-192.168.1.4").unwrap();
        assert_eq!(r.total(), 4);
        assert!(!r.is_inverted());
    }

    #[test]
    fn inverted_range_has_zero_total() {
        let r = AddrRange::parse("10.0.0.5-10.0.0.1").unwrap();
        assert!(r.is_inverted());
        assert_eq!(r.total(), 0);
        assert_eq!(r.iter().count(), 0);
    }

    #[test]
    fn iter_is_ascending() {
        let r = AddrRange::parse("10.0.0.254-10.0.1.1").unwrap();
        let got: Vec<Ipv4Addr> = r.iter().collect();
        assert_eq!(
            got,
            vec![
                Ipv4Addr::new(10, 0, 0, 254),
                Ipv4Addr::new(10, 0, 0, 255),
                Ipv4Addr::new(10, 0, 1, 0),
                Ipv4Addr::new(10, 0, 1, 1),
            ]
        );
    }

    #[test]
    fn cidr_expands_to_network_and_broadcast() {
        let r = AddrRange::parse("10.0.0.0/30").unwrap();
        assert_eq!(r.start(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(r.end(), Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(r.total(), 4);
    }

    #[test]
    fn malformed_endpoints_rejected() {
        assert!(AddrRange::parse("300.0.0.1-10.0.0.2").is_err());
        assert!(AddrRange::parse("10.0.0.1").is_err());
        assert!(validate("not-an-ip", "10.0.0.1").is_err());
    }

    #[test]
    fn validate_reports_inversion_without_side_effects() {
        let s = validate("10.0.0.5", "10.0.0.1").unwrap();
        assert!(s.inverted);
        assert_eq!(s.total, 0);
    }

    #[test]
    fn single_address_range() {
        let r = AddrRange::parse("127.0.0.1-127.0.0.1").unwrap();
        assert_eq!(r.total(), 1);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![Ipv4Addr::LOCALHOST]);
    }
}
