use std::io::Write as _;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use tokio::time;

use proxy_scan_rs::codes;
use proxy_scan_rs::error::ScanError;
use proxy_scan_rs::probe::RelayProbe;
use proxy_scan_rs::range::AddrRange;
use proxy_scan_rs::scheduler::Scheduler;
use proxy_scan_rs::server;
use proxy_scan_rs::types::{ProbeResult, Progress, Protocol, ScanConfig, ScanState};

/// proxy-scan-rs — bounded-concurrency IPv4 proxy range scanner with a tiny embedded web UI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "proxy-scan-rs",
    version,
    about = "Scan an IPv4 range for working HTTP/SOCKS proxies with bounded concurrency.",
    long_about = None
)]
struct Cli {
    /// Address range (A.B.C.D-A.B.C.E) or CIDR (10.0.0.0/24).
    #[arg(long)]
    range: Option<String>,

    /// Proxy port probed on every candidate address.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Proxy protocol to test.
    #[arg(long, value_enum, default_value_t = Protocol::Http)]
    protocol: Protocol,

    /// URL fetched through each candidate proxy.
    #[arg(long = "target-url", default_value = "http://example.com/")]
    target_url: String,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 3_000)]
    timeout_ms: u64,

    /// Max concurrent probes in flight.
    #[arg(long, default_value_t = 200)]
    concurrency: usize,

    /// Outcome codes kept in the filtered report (e.g. "0" or "0,200-204").
    #[arg(long = "accept-codes", default_value = "0")]
    accept_codes: String,

    /// Write the reports as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the embedded HTTP UI server.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Bind address for the embedded UI server.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[derive(Serialize)]
struct Export<'a> {
    progress: Progress,
    full: &'a [ProbeResult],
    filtered: &'a [ProbeResult],
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.range.is_none() && !cli.serve_ui {
        eprintln!("error: either --range or --serve-ui is required");
        process::exit(2);
    }

    let scheduler = Arc::new(Scheduler::new(Arc::new(RelayProbe::new())));

    // UI-only mode: serve until interrupted.
    let Some(range_str) = cli.range.clone() else {
        return server::spawn_server(&cli.bind, scheduler).await;
    };

    if cli.serve_ui {
        let bind = cli.bind.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, scheduler).await {
                eprintln!("HTTP UI server error: {e}");
            }
        });
        println!("UI server starting at http://{} (Ctrl+C to stop)", cli.bind);
    }

    let range = match AddrRange::parse(&range_str) {
        Ok(r) => r,
        Err(e) => fail(&e),
    };
    let accepted = match codes::parse_codes_set(&cli.accept_codes) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("error: invalid --accept-codes: {e}");
            process::exit(2);
        }
    };

    let config = ScanConfig {
        range,
        port: cli.port,
        protocol: cli.protocol,
        target_url: cli.target_url.clone(),
        probe_timeout: Duration::from_millis(cli.timeout_ms),
        max_concurrency: cli.concurrency,
        accepted_codes: accepted,
    };

    println!("proxy-scan-rs configuration:");
    println!("  range        : {}", config.range);
    println!("  port         : {}", config.port);
    println!("  protocol     : {}", config.protocol);
    println!("  target url   : {}", config.target_url);
    println!("  timeout_ms   : {}", cli.timeout_ms);
    println!("  concurrency  : {}", config.max_concurrency);
    println!("  accept codes : {}", cli.accept_codes);

    let mut state_rx = scheduler.watch_state();
    let progress_rx = scheduler.watch_progress();

    if let Err(e) = scheduler.start(config) {
        fail(&e);
    }

    let mut stopped = false;
    let mut ticker = time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let p = *progress_rx.borrow();
                print!("\rscanning {}/{} ({:>5.1}%)   ", p.completed, p.total, p.fraction * 100.0);
                let _ = std::io::stdout().flush();
            }
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow_and_update() == ScanState::Finished {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nstopping...");
                if let Err(e) = scheduler.stop().await {
                    eprintln!("warning: {e}");
                }
                stopped = true;
                break;
            }
        }
    }
    println!();

    if stopped {
        println!("scan stopped; reports cleared.");
    } else {
        let progress = scheduler.progress();
        let full = scheduler.full_report();
        let filtered = scheduler.filtered_report();
        print_results_table(&filtered);
        println!(
            "\nMatching proxies: {} (probed: {}/{})",
            filtered.len(),
            progress.completed,
            progress.total
        );

        if let Some(path) = cli.output.as_deref() {
            let export = Export {
                progress,
                full: &full,
                filtered: &filtered,
            };
            if let Err(e) = write_report_json(path, &export) {
                eprintln!("Failed to write JSON to {}: {}", path.display(), e);
            } else {
                println!("Wrote JSON report to {}", path.display());
            }
        }
    }

    // If the UI is running, keep the process alive until Ctrl+C.
    if cli.serve_ui && !stopped {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

fn fail(e: &ScanError) -> ! {
    eprintln!("error: {e}");
    process::exit(exit_code(e));
}

fn exit_code(e: &ScanError) -> i32 {
    match e {
        ScanError::InvalidAddress(_) | ScanError::InvalidConcurrency(_) => 2,
        ScanError::AlreadyRunning => 3,
        ScanError::NetworkUnavailable => 4,
        ScanError::CancellationTimeout(_) => 5,
    }
}

fn print_results_table(results: &[ProbeResult]) {
    let mut addr_w = "address".len();
    let mut msg_w = "message".len();
    for r in results {
        addr_w = addr_w.max(r.address.to_string().len());
        msg_w = msg_w.max(r.message.len().min(60));
    }
    let port_w = "port".len().max(5);
    let code_w = "code".len().max(4);

    println!(
        "{:<addr_w$}  {:>port_w$}  {:>code_w$}  {:<msg_w$}",
        "address",
        "port",
        "code",
        "message",
        addr_w = addr_w,
        port_w = port_w,
        code_w = code_w,
        msg_w = msg_w
    );
    println!(
        "{:-<addr_w$}  {:-<port_w$}  {:-<code_w$}  {:-<msg_w$}",
        "",
        "",
        "",
        "",
        addr_w = addr_w,
        port_w = port_w,
        code_w = code_w,
        msg_w = msg_w
    );
    for r in results {
        let mut msg = r.message.clone();
        if msg.len() > 60 {
            msg.truncate(60);
        }
        println!(
            "{:<addr_w$}  {:>port_w$}  {:>code_w$}  {:<msg_w$}",
            r.address,
            r.port,
            r.code,
            msg,
            addr_w = addr_w,
            port_w = port_w,
            code_w = code_w,
            msg_w = msg_w
        );
    }
}

fn write_report_json(path: &std::path::Path, export: &Export<'_>) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, export)?;
    Ok(())
}
