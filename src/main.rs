use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lan_probe_rs::logging::{init_logging, LogOptions};
use lan_probe_rs::lookup::DnsResolver;
use lan_probe_rs::{netdetect, ports, server};
use lan_probe_rs::{ProbeResult, ScanConfig, ScanEngine, ScanEvent, ScanOutcome, ScanSummary};

/// Bounded-concurrency TCP connect scanner.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-probe-rs",
    version,
    about = "Bounded-concurrency TCP connect scanner with streaming results.",
    long_about = None
)]
struct Cli {
    /// IPs/CIDRs (comma separated) or a file with one entry per line.
    /// If omitted, every local IPv4 /24 is scanned.
    #[arg(long)]
    targets: Option<String>,

    /// Ports and ranges (e.g. `22,80,8000-8100`) or a file. Defaults to a well-known list.
    #[arg(long)]
    ports: Option<String>,

    /// Hosts probed at the same time.
    #[arg(long = "host-threads", default_value_t = 5)]
    host_threads: usize,

    /// Port probes in flight at the same time across all hosts.
    #[arg(long = "port-threads", default_value_t = 100)]
    port_threads: usize,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 4000)]
    timeout_ms: u64,

    /// Skip reverse DNS lookups.
    #[arg(long = "no-resolve", default_value_t = false)]
    no_resolve: bool,

    /// Also report closed and timed-out ports.
    #[arg(long = "show-closed", default_value_t = false)]
    show_closed: bool,

    /// Write the final summary as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the HTTP API on this address instead of running a one-off scan.
    #[arg(long = "serve-ui")]
    serve_ui: Option<String>,

    /// Log filter (overridden by RUST_LOG).
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Log as JSON lines.
    #[arg(long = "json-logs", default_value_t = false)]
    json_logs: bool,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig::default()
            .with_host_concurrency(self.host_threads)
            .with_port_concurrency(self.port_threads)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_resolve_hostnames(!self.no_resolve)
            .with_include_non_open(self.show_closed)
            .normalized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogOptions {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    })?;

    if let Some(bind) = cli.serve_ui.as_deref() {
        return server::spawn_server(bind).await;
    }

    let targets = resolve_targets(cli.targets.as_deref())?;
    let ports = match cli.ports.as_deref() {
        Some(arg) => ports::load_ports(arg)?,
        None => ports::default_ports(),
    };
    if targets.is_empty() {
        bail!("no targets to scan");
    }

    let mut engine = ScanEngine::new(cli.scan_config()).with_port_lookup(ports::WellKnownPorts);
    let config = engine.config().clone();
    info!(
        targets = targets.len(),
        ports = ports.len(),
        host_threads = config.host_concurrency,
        port_threads = config.port_concurrency,
        timeout_ms = config.timeout_ms,
        "starting scan"
    );
    if config.resolve_hostnames {
        engine = engine.with_resolver(DnsResolver::from_system_conf(config.probe_timeout()));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling scan");
            ctrl_c.cancel();
        }
    });

    let mut stream = engine.scan(targets, ports, &cancel);
    let mut summary = ScanSummary::new(stream.total(), stream.started_at().to_string());
    while let Some(event) = stream.next().await {
        match &event {
            ScanEvent::Result(r) => println!("{}", format_row(r)),
            ScanEvent::Progress { completed, total } => {
                debug!(completed, total, "progress");
            }
            ScanEvent::Completed | ScanEvent::Canceled | ScanEvent::Failed(_) => {}
        }
        summary.record(event);
    }
    summary.finished_at = lan_probe_rs::stream::now_rfc3339();

    print!("{}", render_summary(&summary));
    if let Some(path) = cli.output.as_deref() {
        match write_summary_json(path, &summary) {
            Ok(()) => info!("wrote JSON results to {}", path.display()),
            Err(e) => error!("failed to write JSON to {}: {e:#}", path.display()),
        }
    }

    if let ScanOutcome::Failed(reason) = &summary.outcome {
        bail!("scan failed: {reason}");
    }
    Ok(())
}

fn resolve_targets(arg: Option<&str>) -> Result<Vec<IpAddr>> {
    if let Some(arg) = arg {
        return netdetect::load_targets(arg);
    }
    let cidrs = netdetect::detect_local_cidrs()?;
    let mut ips = Vec::new();
    for cidr in cidrs {
        let hosts = netdetect::expand_cidr_to_ips(cidr);
        info!("auto-detected {} ({} hosts)", cidr, hosts.len());
        ips.extend(hosts);
    }
    Ok(ips)
}

fn format_row(r: &ProbeResult) -> String {
    let name = r.hostname.as_deref().unwrap_or("");
    let service = r.info.as_ref().map(|i| i.service.as_str()).unwrap_or("");
    format!("{:<39} {:>5}  {:<9}  {:<14} {}", r.host, r.port, r.state, service, name)
}

/// Final table, ordered by host then port, followed by the one-line tally.
fn render_summary(summary: &ScanSummary) -> String {
    let mut rows: Vec<&ProbeResult> = summary.results.iter().collect();
    rows.sort_by_key(|r| (r.host, r.port));

    let mut out = String::from("\n");
    if !rows.is_empty() {
        out.push_str(&format!(
            "{:<39} {:>5}  {:<9}  {:<14} {}\n",
            "HOST", "PORT", "STATE", "SERVICE", "HOSTNAME"
        ));
        for r in rows {
            out.push_str(&format_row(r));
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "{}: {} of {} probes finished, {} open\n",
        summary.outcome.as_str(),
        summary.completed,
        summary.total,
        summary.open
    ));
    out
}

fn write_summary_json(path: &Path, summary: &ScanSummary) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
