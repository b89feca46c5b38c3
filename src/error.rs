use thiserror::Error;

/// Result type alias for scheduler-level operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Failures of the scheduler itself.
///
/// A probe timing out or erroring is never one of these; per-probe outcomes
/// are recorded as data in the reports.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A range endpoint (or other address-shaped input) failed to parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Concurrency limit rejected at configuration time.
    #[error("invalid concurrency limit: {0} (must be >= 1)")]
    InvalidConcurrency(usize),

    /// `start` was called while a scan was being provisioned or running.
    #[error("a scan is already running")]
    AlreadyRunning,

    /// The reachability gate reported the network as down.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// `stop` could not drain in-flight probes within the grace period.
    /// The stragglers were force-abandoned; the scheduler is still idle
    /// and consistent afterwards.
    #[error("cancellation timed out; {0} probe(s) abandoned")]
    CancellationTimeout(usize),
}
