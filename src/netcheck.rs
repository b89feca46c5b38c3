use if_addrs::{get_if_addrs, IfAddr};

/// Reachability signal consulted before a scan may start.
///
/// Scanning while the network is down would only produce probes doomed to
/// time out, so the scheduler fails fast instead.
pub trait NetworkGate: Send + Sync {
    fn network_available(&self) -> bool;
}

/// Default gate: the network counts as available when any non-loopback IPv4
/// interface is up.
#[derive(Debug, Default)]
pub struct IfaceGate;

impl NetworkGate for IfaceGate {
    fn network_available(&self) -> bool {
        match get_if_addrs() {
            Ok(ifaces) => ifaces.iter().any(|iface| match &iface.addr {
                IfAddr::V4(v4) => !v4.ip.is_loopback(),
                IfAddr::V6(_) => false,
            }),
            Err(_) => false,
        }
    }
}

/// Fixed answer, for tests and for embedders that poll reachability
/// themselves and push the result in.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

impl NetworkGate for StaticGate {
    fn network_available(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_gate_returns_its_answer() {
        assert!(StaticGate(true).network_available());
        assert!(!StaticGate(false).network_available());
    }
}
