use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ::time::{format_description::well_known, OffsetDateTime};

use crate::error::{Result, ScanError};
use crate::netcheck::{IfaceGate, NetworkGate};
use crate::probe::{ProbeExecutor, ProbeReply, ProbeRequest};
use crate::reports::Reports;
use crate::types::{ProbeResult, Progress, ScanConfig, ScanEvent, ScanState};

const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);
const EVENT_CAPACITY: usize = 256;

/// Drives one scan at a time: walks the address range with an integer
/// cursor, keeps at most `max_concurrency` probes in flight, and feeds every
/// completion through a single serialized bookkeeping path.
///
/// Reusable across scans; `Finished` is terminal only for the current scan's
/// progress sequence, not for the scheduler.
pub struct Scheduler {
    executor: Arc<dyn ProbeExecutor>,
    gate: Arc<dyn NetworkGate>,
    stop_grace: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    state_tx: watch::Sender<ScanState>,
    progress_tx: watch::Sender<Progress>,
    events_tx: broadcast::Sender<ScanEvent>,
    reports: Mutex<Reports>,
    /// Distinguishes the current scan from previous ones so stale
    /// late-arriving completions never corrupt current state.
    generation: AtomicU64,
    in_flight: AtomicU64,
    active: Mutex<Option<ActiveScan>>,
}

struct ActiveScan {
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

/// Completion event off the probe queue. Carrying the address in the payload
/// gives O(1) association of a result with its candidate.
struct Completion {
    address: Ipv4Addr,
    reply: ProbeReply,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        let (state_tx, _) = watch::channel(ScanState::Idle);
        let (progress_tx, _) = watch::channel(Progress::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            executor,
            gate: Arc::new(IfaceGate),
            stop_grace: DEFAULT_STOP_GRACE,
            shared: Arc::new(Shared {
                state_tx,
                progress_tx,
                events_tx,
                reports: Mutex::new(Reports::default()),
                generation: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn with_network_gate(mut self, gate: Arc<dyn NetworkGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Bound on how long `stop` waits for in-flight probes before
    /// force-abandoning them.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn state(&self) -> ScanState {
        *self.shared.state_tx.borrow()
    }

    pub fn progress(&self) -> Progress {
        *self.shared.progress_tx.borrow()
    }

    pub fn full_report(&self) -> Vec<ProbeResult> {
        self.shared.reports.lock().expect("reports lock").full().to_vec()
    }

    pub fn filtered_report(&self) -> Vec<ProbeResult> {
        self.shared
            .reports
            .lock()
            .expect("reports lock")
            .filtered()
            .to_vec()
    }

    pub fn accepted_codes(&self) -> HashSet<i32> {
        self.shared.reports.lock().expect("reports lock").accepted().clone()
    }

    /// Replace the accepted-code filter and synchronously recompute the
    /// filtered report. Safe to call while a scan is running; never causes
    /// probes to re-run.
    pub fn set_accepted_codes(&self, codes: HashSet<i32>) {
        self.shared
            .reports
            .lock()
            .expect("reports lock")
            .set_accepted(codes);
        let _ = self.shared.events_tx.send(ScanEvent::FilterChanged);
    }

    pub fn watch_state(&self) -> watch::Receiver<ScanState> {
        self.shared.state_tx.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<Progress> {
        self.shared.progress_tx.subscribe()
    }

    /// Subscribe to discrete change notifications (state, progress, results,
    /// filter). UI/automation layers attach here; the core never depends on
    /// any presentation layer.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Begin a scan over `config`'s snapshot. Must run inside a tokio
    /// runtime; returns as soon as the scan is provisioned.
    ///
    /// Fails with `AlreadyRunning` unless the scheduler is idle or finished,
    /// `NetworkUnavailable` when the gate reports offline, and
    /// `InvalidConcurrency` for a zero limit. An inverted or empty range is
    /// not an error: the scan finishes immediately with 0/0 progress and
    /// empty reports.
    pub fn start(&self, config: ScanConfig) -> Result<()> {
        let mut active = self.shared.active.lock().expect("active lock");

        let state = *self.shared.state_tx.borrow();
        if !matches!(state, ScanState::Idle | ScanState::Finished) {
            return Err(ScanError::AlreadyRunning);
        }
        // A finished scan may still be registered; the new scan replaces it.
        if let Some(prev) = active.take() {
            prev.driver.abort();
        }

        if !self.gate.network_available() {
            return Err(ScanError::NetworkUnavailable);
        }
        config.validate()?;

        self.shared.set_state(ScanState::ValidatingRange);
        let summary = config.range.summary();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut reports = self.shared.reports.lock().expect("reports lock");
            reports.clear();
            reports.set_accepted(config.accepted_codes.clone());
        }
        let _ = self.shared.events_tx.send(ScanEvent::ReportsCleared);

        if summary.total == 0 {
            debug!(range = %config.range, inverted = summary.inverted, "empty range, nothing to dispatch");
            self.shared.set_progress(Progress::new(0, 0));
            self.shared.set_state(ScanState::Finished);
            return Ok(());
        }

        self.shared.set_progress(Progress::new(0, summary.total));
        self.shared.set_state(ScanState::ProvisioningWorkers);

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(
            self.shared.clone(),
            self.executor.clone(),
            config,
            summary.total,
            generation,
            cancel.clone(),
        ));
        *active = Some(ActiveScan { cancel, driver });
        Ok(())
    }

    /// Cancel the current scan and reset to `Idle` with cleared reports and
    /// 0/0 progress.
    ///
    /// Cooperative with a bounded grace period: in-flight probes are
    /// signalled, waited for up to the grace bound, then force-abandoned.
    /// `CancellationTimeout` reports forced abandonment; the scheduler is
    /// idle and consistent even then.
    pub async fn stop(&self) -> Result<()> {
        let taken = {
            let mut active = self.shared.active.lock().expect("active lock");
            // Freeze recording first: completions from the old generation
            // are discarded from this point on.
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            active.take()
        };

        let Some(scan) = taken else {
            if *self.shared.state_tx.borrow() != ScanState::Idle {
                self.reset_to_idle();
            }
            return Ok(());
        };

        scan.cancel.cancel();
        let abort = scan.driver.abort_handle();
        let drained = time::timeout(self.stop_grace, scan.driver).await.is_ok();
        let abandoned = if drained {
            0
        } else {
            let n = self.shared.in_flight.load(Ordering::Relaxed) as usize;
            abort.abort();
            self.shared.in_flight.store(0, Ordering::Relaxed);
            n.max(1)
        };

        self.reset_to_idle();
        if abandoned > 0 {
            return Err(ScanError::CancellationTimeout(abandoned));
        }
        Ok(())
    }

    fn reset_to_idle(&self) {
        self.shared.clear_reports();
        self.shared.set_progress(Progress::default());
        self.shared.set_state(ScanState::Idle);
    }
}

impl Shared {
    fn set_state(&self, state: ScanState) {
        self.state_tx.send_replace(state);
        let _ = self.events_tx.send(ScanEvent::StateChanged(state));
    }

    fn set_progress(&self, progress: Progress) {
        self.progress_tx.send_replace(progress);
        let _ = self.events_tx.send(ScanEvent::ProgressChanged(progress));
    }

    fn clear_reports(&self) {
        self.reports.lock().expect("reports lock").clear();
        let _ = self.events_tx.send(ScanEvent::ReportsCleared);
    }
}

/// The single serialized dispatch/completion path of one scan. All cursor
/// and counter mutations happen here; nothing else dispatches probes.
async fn drive(
    shared: Arc<Shared>,
    executor: Arc<dyn ProbeExecutor>,
    config: ScanConfig,
    total: u64,
    generation: u64,
    cancel: CancellationToken,
) {
    shared.set_state(ScanState::Scanning);

    let mut cursor = config.range.iter();
    let mut in_flight: usize = 0;
    let mut remaining = total;
    let (done_tx, mut done_rx) = mpsc::channel::<Completion>(config.max_concurrency);
    let mut probes: JoinSet<()> = JoinSet::new();

    let initial = config.max_concurrency.min(usize::try_from(total).unwrap_or(usize::MAX));
    for _ in 0..initial {
        if let Some(address) = cursor.next() {
            dispatch(&mut probes, &executor, &config, address, done_tx.clone(), &cancel);
            in_flight += 1;
        }
    }
    shared.in_flight.store(in_flight as u64, Ordering::Relaxed);
    debug!(total, initial = in_flight, "scan dispatched");

    let mut finished = false;
    while !finished {
        tokio::select! {
            _ = cancel.cancelled() => break,
            completion = done_rx.recv() => {
                let Some(done) = completion else { break };
                in_flight -= 1;
                remaining -= 1;
                shared.in_flight.store(in_flight as u64, Ordering::Relaxed);

                // Report first, then progress: a reader must never see a
                // completion counted but missing from the full report.
                if record(&shared, &config, generation, done) {
                    shared.set_progress(Progress::new(total - remaining, total));
                }

                while probes.try_join_next().is_some() {}

                if remaining == 0 && in_flight == 0 {
                    finished = true;
                } else if in_flight < config.max_concurrency {
                    if let Some(address) = cursor.next() {
                        dispatch(&mut probes, &executor, &config, address, done_tx.clone(), &cancel);
                        in_flight += 1;
                        shared.in_flight.store(in_flight as u64, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    if finished {
        finish(&shared, generation);
        return;
    }

    // Cancelled. In-flight probes resolve promptly (their select observes
    // the token); drain their completions and discard them. Anything that
    // outlives the caller's grace period is aborted by `stop`.
    while in_flight > 0 {
        match done_rx.recv().await {
            Some(_) => {
                in_flight -= 1;
                shared.in_flight.store(in_flight as u64, Ordering::Relaxed);
            }
            None => break,
        }
    }
    probes.abort_all();
    shared.in_flight.store(0, Ordering::Relaxed);
    debug!("scan drained after cancellation");
}

fn dispatch(
    probes: &mut JoinSet<()>,
    executor: &Arc<dyn ProbeExecutor>,
    config: &ScanConfig,
    address: Ipv4Addr,
    done_tx: mpsc::Sender<Completion>,
    cancel: &CancellationToken,
) {
    let fut = executor.probe(ProbeRequest {
        address,
        port: config.port,
        protocol: config.protocol,
        target_url: config.target_url.clone(),
        timeout: config.probe_timeout,
    });
    let cancel = cancel.clone();
    probes.spawn(async move {
        let reply = tokio::select! {
            r = fut => r,
            _ = cancel.cancelled() => ProbeReply::cancelled(),
        };
        let _ = done_tx.send(Completion { address, reply }).await;
    });
}

/// Append one completion to the reports unless it is stale. Returns whether
/// it was recorded.
fn record(shared: &Shared, config: &ScanConfig, generation: u64, done: Completion) -> bool {
    if shared.generation.load(Ordering::SeqCst) != generation {
        return false;
    }
    let result = ProbeResult {
        address: done.address,
        port: config.port,
        code: done.reply.code,
        message: done.reply.message,
        timestamp: now_rfc3339(),
    };
    shared
        .reports
        .lock()
        .expect("reports lock")
        .record(result.clone());
    let _ = shared.events_tx.send(ScanEvent::ResultRecorded(result));
    true
}

fn finish(shared: &Shared, generation: u64) {
    let mut active = shared.active.lock().expect("active lock");
    if shared.generation.load(Ordering::SeqCst) != generation {
        // A stop raced the last completion; it owns the state transitions.
        return;
    }
    *active = None;
    drop(active);
    shared.set_state(ScanState::Finished);
    debug!("scan finished");
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
