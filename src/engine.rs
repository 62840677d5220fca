//! Scan orchestration.
//!
//! A scan fans out over hosts under a host-level [`ConcurrencyLimiter`] and,
//! inside each host, over ports under a per-host port limiter. Every unit is
//! probed at most once; results and progress go out on the scan's
//! [`ResultStream`] as soon as they are known.
//!
//! Each call to [`ScanEngine::scan`] owns a private multi-threaded runtime
//! running on a dedicated supervisor thread. The runtime is sized from the
//! scan's concurrency settings and is torn down before the terminal signal is
//! sent, so nothing produced by the scan can follow that signal.

use crate::config::ScanConfig;
use crate::error::EngineError;
use crate::limiter::{Admission, ConcurrencyLimiter};
use crate::lookup::{HostnameResolver, NoLookup, NoResolve, PortLookup};
use crate::probe::{Probe, TcpConnectProbe};
use crate::progress::ProgressAggregator;
use crate::stream::{self, EventSink, ResultStream, DEFAULT_CHANNEL_CAPACITY};
use crate::types::{PortState, ProbeResult, ScanEvent};
use std::collections::HashSet;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// How long a finished scan waits for stray blocking work when its runtime shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type WorkerResult = Result<(), EngineError>;

/// Entry point for bounded-concurrency scans.
///
/// ```no_run
/// use lan_probe_rs::{ScanConfig, ScanEngine, ScanEvent};
/// use std::net::{IpAddr, Ipv4Addr};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() {
/// let engine = ScanEngine::new(ScanConfig::default());
/// let cancel = CancellationToken::new();
/// let mut stream = engine.scan([IpAddr::V4(Ipv4Addr::LOCALHOST)], [22, 80], &cancel);
/// while let Some(event) = stream.next().await {
///     if let ScanEvent::Result(r) = event {
///         println!("{}:{} {}", r.host, r.port, r.state);
///     }
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct ScanEngine {
    config: ScanConfig,
    probe: Arc<dyn Probe>,
    resolver: Arc<dyn HostnameResolver>,
    lookup: Arc<dyn PortLookup>,
    channel_capacity: usize,
}

impl ScanEngine {
    /// Engine using TCP connect probes and no annotation collaborators.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config: config.normalized(),
            probe: Arc::new(TcpConnectProbe),
            resolver: Arc::new(NoResolve),
            lookup: Arc::new(NoLookup),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_resolver(mut self, resolver: impl HostnameResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_port_lookup(mut self, lookup: impl PortLookup + 'static) -> Self {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Events buffered before producers start waiting on the consumer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Start scanning every `(target, port)` pair and return immediately.
    ///
    /// Duplicate targets and ports are ignored. An empty target or port set
    /// yields a stream holding only [`ScanEvent::Completed`]. Canceling
    /// `cancel` (or dropping the returned stream) stops admitting new work;
    /// the stream then ends with [`ScanEvent::Canceled`].
    pub fn scan(
        &self,
        targets: impl IntoIterator<Item = IpAddr>,
        ports: impl IntoIterator<Item = u16>,
        cancel: &CancellationToken,
    ) -> ResultStream {
        let targets = dedup(targets);
        let ports = dedup(ports);
        let total = targets.len() as u64 * ports.len() as u64;
        let session_cancel = cancel.child_token();
        let (sink, stream) = stream::channel(self.channel_capacity, total, session_cancel.clone());

        if total == 0 {
            debug!(
                targets = targets.len(),
                ports = ports.len(),
                "nothing to probe, completing immediately"
            );
            sink.try_finish(ScanEvent::Completed);
            return stream;
        }

        let session = ScanSession {
            config: self.config.clone(),
            probe: self.probe.clone(),
            resolver: self.resolver.clone(),
            lookup: self.lookup.clone(),
            ports,
            progress: ProgressAggregator::new(total, sink.clone()),
            sink: sink.clone(),
            cancel: session_cancel,
        };

        let spawned = std::thread::Builder::new()
            .name("scan-supervisor".into())
            .spawn(move || supervise(session, targets));
        if let Err(e) = spawned {
            let err = EngineError::Supervisor(e);
            error!("{err}");
            sink.try_finish(ScanEvent::Failed(err.to_string()));
        }
        stream
    }
}

/// State owned by one scan and shared read-only by its workers.
struct ScanSession {
    config: ScanConfig,
    probe: Arc<dyn Probe>,
    resolver: Arc<dyn HostnameResolver>,
    lookup: Arc<dyn PortLookup>,
    ports: Vec<u16>,
    progress: ProgressAggregator,
    sink: EventSink,
    cancel: CancellationToken,
}

struct ProbeUnit {
    host: IpAddr,
    hostname: Option<String>,
    port: u16,
}

/// Runs on the supervisor thread: builds the worker pool, drives the scan,
/// tears the pool down and sends the terminal signal.
fn supervise(session: ScanSession, targets: Vec<IpAddr>) {
    let started = Instant::now();
    let sink = session.sink.clone();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(session.config.worker_threads())
        .max_blocking_threads(session.config.blocking_threads())
        .thread_name("scan-worker")
        .enable_all()
        .build();
    let runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            let err = EngineError::WorkerPool(e);
            error!("{err}");
            drop(session);
            sink.finish_blocking(ScanEvent::Failed(err.to_string()));
            return;
        }
    };

    let session = Arc::new(session);
    let outcome = runtime.block_on({
        let session = session.clone();
        async move {
            match tokio::spawn(orchestrate(session, targets)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(EngineError::from(e)),
            }
        }
    });
    if outcome.is_err() {
        session.cancel.cancel();
    }
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    let completed = session.progress.completed();
    let total = session.progress.total();
    drop(session);

    let terminal = match outcome {
        Ok(()) if completed == total => ScanEvent::Completed,
        Ok(()) => ScanEvent::Canceled,
        Err(err) => {
            error!("scan aborted: {err}");
            ScanEvent::Failed(err.to_string())
        }
    };
    info!(
        completed,
        total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        outcome = ?terminal,
        "scan finished"
    );
    sink.finish_blocking(terminal);
}

async fn orchestrate(session: Arc<ScanSession>, targets: Vec<IpAddr>) -> WorkerResult {
    info!(
        hosts = targets.len(),
        ports = session.ports.len(),
        host_concurrency = session.config.host_concurrency,
        ports_per_host = session.config.ports_per_host(),
        timeout_ms = session.config.timeout_ms,
        "scan started"
    );

    let host_limiter = ConcurrencyLimiter::new(session.config.host_concurrency);
    let mut hosts = JoinSet::new();

    for host in targets {
        let slot = match host_limiter.acquire(&session.cancel).await {
            Admission::Granted(slot) => slot,
            Admission::Canceled => {
                debug!("scan canceled, no further hosts admitted");
                break;
            }
        };
        let session_for_host = session.clone();
        hosts.spawn(async move {
            let outcome = scan_host(&session_for_host, host).await;
            slot.release();
            outcome
        });
        reap(&mut hosts, &session.cancel).await?;
    }

    drain(&mut hosts, &session.cancel).await
}

async fn scan_host(session: &Arc<ScanSession>, host: IpAddr) -> WorkerResult {
    let hostname = if session.config.resolve_hostnames {
        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Ok(()),
            name = session.resolver.resolve(host) => name,
        }
    } else {
        None
    };
    debug!(%host, hostname = hostname.as_deref().unwrap_or("-"), "probing host");

    let port_limiter = ConcurrencyLimiter::new(session.config.ports_per_host());
    let mut units = JoinSet::new();

    for &port in &session.ports {
        let slot = match port_limiter.acquire(&session.cancel).await {
            Admission::Granted(slot) => slot,
            Admission::Canceled => break,
        };
        let unit = ProbeUnit {
            host,
            hostname: hostname.clone(),
            port,
        };
        let session_for_unit = session.clone();
        units.spawn(async move {
            let outcome = probe_unit(&session_for_unit, unit).await;
            slot.release();
            outcome
        });
        reap(&mut units, &session.cancel).await?;
    }

    drain(&mut units, &session.cancel).await
}

async fn probe_unit(session: &ScanSession, unit: ProbeUnit) -> WorkerResult {
    let timeout = session.config.probe_timeout();
    let state = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => return Ok(()),
        outcome = time::timeout(timeout, session.probe.probe(unit.host, unit.port, timeout)) => {
            outcome.unwrap_or(PortState::TimedOut)
        }
    };
    // late results of a canceled scan are discarded
    if session.cancel.is_cancelled() {
        return Ok(());
    }
    trace!(host = %unit.host, port = unit.port, %state, "probe finished");

    if state.is_open() || session.config.include_non_open {
        let result = ProbeResult {
            host: unit.host,
            hostname: unit.hostname,
            port: unit.port,
            info: session.lookup.lookup(unit.port, session.probe.protocol()),
            state,
        };
        if !session.sink.emit(ScanEvent::Result(result)).await {
            return Ok(());
        }
    }
    session.progress.record_unit_done().await;
    Ok(())
}

/// Collect workers that already finished, failing fast on the first error.
async fn reap(set: &mut JoinSet<WorkerResult>, cancel: &CancellationToken) -> WorkerResult {
    while let Some(joined) = set.try_join_next() {
        if let Err(err) = flatten(joined) {
            return abort(set, cancel, err).await;
        }
    }
    Ok(())
}

/// Wait for every worker in `set`.
async fn drain(set: &mut JoinSet<WorkerResult>, cancel: &CancellationToken) -> WorkerResult {
    while let Some(joined) = set.join_next().await {
        if let Err(err) = flatten(joined) {
            return abort(set, cancel, err).await;
        }
    }
    Ok(())
}

async fn abort(
    set: &mut JoinSet<WorkerResult>,
    cancel: &CancellationToken,
    err: EngineError,
) -> WorkerResult {
    cancel.cancel();
    set.shutdown().await;
    Err(err)
}

fn flatten(joined: Result<WorkerResult, JoinError>) -> WorkerResult {
    joined.map_err(EngineError::from).and_then(|outcome| outcome)
}

fn dedup<T: Copy + Eq + Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}
