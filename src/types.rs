use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::range::AddrRange;

/// Proxy protocol spoken to the candidate address.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        };
        f.write_str(s)
    }
}

/// Integer outcome codes recorded per probe.
///
/// These classify the transport-level result of one relay attempt; they are
/// plain data to the scheduler and the report filter, never errors.
pub mod outcome {
    /// The proxy relayed the test request.
    pub const OK: i32 = 0;
    /// TCP connection to the candidate was refused.
    pub const CONNECTION_REFUSED: i32 = 1;
    /// The candidate accepted the connection, then closed it early.
    pub const REMOTE_HOST_CLOSED: i32 = 2;
    /// No reply within the per-probe timeout.
    pub const TIMED_OUT: i32 = 4;
    /// The probe was cancelled before completing.
    pub const CANCELLED: i32 = 5;
    /// The proxy answered but refused to relay (CONNECT/SOCKS denial).
    pub const PROXY_REFUSED: i32 = 6;
    /// The reply did not parse as the expected protocol.
    pub const PROTOCOL_ERROR: i32 = 7;
    /// Any other transport error.
    pub const IO_ERROR: i32 = 99;
}

/// Outcome of testing one candidate address. Immutable once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub address: Ipv4Addr,
    pub port: u16,
    pub code: i32,
    pub message: String,
    pub timestamp: String,
}

/// Progress counters for the current scan.
///
/// `total` is fixed when the scan starts; `completed` only grows.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
    pub fraction: f64,
}

impl Progress {
    pub fn new(completed: u64, total: u64) -> Self {
        let fraction = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };
        Self {
            completed,
            total,
            fraction,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Discrete phases of the scheduler.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    ValidatingRange,
    ProvisioningWorkers,
    Scanning,
    Finished,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::ValidatingRange => "validating_range",
            ScanState::ProvisioningWorkers => "provisioning_workers",
            ScanState::Scanning => "scanning",
            ScanState::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Change notifications emitted by the scheduler for UI/automation layers.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    StateChanged(ScanState),
    ProgressChanged(Progress),
    /// A probe finished and its result was appended to the full report
    /// (and to the filtered report when its code is accepted).
    ResultRecorded(ProbeResult),
    /// The accepted-code set changed and the filtered report was recomputed.
    FilterChanged,
    ReportsCleared,
}

/// Immutable snapshot of everything one scan needs. Built by the caller,
/// consumed by `Scheduler::start`.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub range: AddrRange,
    pub port: u16,
    pub protocol: Protocol,
    pub target_url: String,
    pub probe_timeout: Duration,
    pub max_concurrency: usize,
    pub accepted_codes: HashSet<i32>,
}

impl ScanConfig {
    /// Check the parts of the config the scheduler cannot express through
    /// types alone. Runs before any probe is dispatched.
    pub fn validate(&self) -> Result<(), crate::error::ScanError> {
        if self.max_concurrency == 0 {
            return Err(crate::error::ScanError::InvalidConcurrency(0));
        }
        if self.max_concurrency > 500 {
            tracing::warn!(
                max_concurrency = self.max_concurrency,
                "unusually high concurrency limit"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_zero_for_empty_total() {
        let p = Progress::new(0, 0);
        assert_eq!(p.fraction, 0.0);
    }

    #[test]
    fn fraction_tracks_completion() {
        let p = Progress::new(3, 4);
        assert!((p.fraction - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn protocol_display_is_lowercase() {
        assert_eq!(Protocol::Socks5.to_string(), "socks5");
        assert_eq!(Protocol::Http.to_string(), "http");
    }
}
