use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on worker threads provisioned for a single scan's runtime.
pub const MAX_WORKER_THREADS: usize = 64;

/// Upper bound on blocking threads a single scan may spawn (tokio's own default).
pub const MAX_BLOCKING_THREADS: usize = 512;

/// Tunables for one scan. Immutable once handed to a [`crate::engine::ScanEngine`].
///
/// `port_concurrency` is the total number of simultaneous port probes across
/// all hosts; each active host gets an even share of it (see [`Self::ports_per_host`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hosts probed at the same time.
    pub host_concurrency: usize,
    /// Port probes in flight at the same time, summed over all hosts.
    pub port_concurrency: usize,
    /// Deadline for a single probe in milliseconds.
    pub timeout_ms: u64,
    /// Resolve a PTR name once per host before probing it.
    pub resolve_hostnames: bool,
    /// Surface `Closed` and `TimedOut` results as well as `Open` ones.
    pub include_non_open: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            host_concurrency: 5,
            port_concurrency: 100,
            timeout_ms: 4000,
            resolve_hostnames: true,
            include_non_open: false,
        }
    }
}

impl ScanConfig {
    /// Clamp every knob into a schedulable range. Zero concurrency becomes 1
    /// rather than an error so the engine can always make progress.
    pub fn normalized(mut self) -> Self {
        self.host_concurrency = self.host_concurrency.max(1);
        self.port_concurrency = self.port_concurrency.max(1);
        self.timeout_ms = self.timeout_ms.max(1);
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Port probe slots granted to each active host.
    pub fn ports_per_host(&self) -> usize {
        (self.port_concurrency / self.host_concurrency.max(1)).max(1)
    }

    /// Worker threads for the scan's private runtime.
    pub fn worker_threads(&self) -> usize {
        self.host_concurrency
            .saturating_add(self.port_concurrency)
            .clamp(1, MAX_WORKER_THREADS)
    }

    /// Blocking threads for the scan's private runtime: enough for every
    /// probe and hostname lookup that can be in flight at once.
    pub fn blocking_threads(&self) -> usize {
        self.host_concurrency
            .saturating_add(self.port_concurrency)
            .clamp(1, MAX_BLOCKING_THREADS)
    }

    pub fn with_host_concurrency(mut self, n: usize) -> Self {
        self.host_concurrency = n;
        self
    }

    pub fn with_port_concurrency(mut self, n: usize) -> Self {
        self.port_concurrency = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_resolve_hostnames(mut self, on: bool) -> Self {
        self.resolve_hostnames = on;
        self
    }

    pub fn with_include_non_open(mut self, on: bool) -> Self {
        self.include_non_open = on;
        self
    }
}
