use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Outcome of a single probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    /// Actively refused, or any transport error (unreachable networks included).
    Closed,
    TimedOut,
}

impl PortState {
    pub fn is_open(self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::TimedOut => "timed_out",
        };
        f.pad(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Service annotation supplied by a [`crate::lookup::PortLookup`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortInfo {
    pub port: u16,
    pub protocol: Protocol,
    pub service: String,
    pub description: String,
}

/// One completed probe unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeResult {
    pub host: IpAddr,
    pub hostname: Option<String>,
    pub port: u16,
    pub info: Option<PortInfo>,
    pub state: PortState,
}

/// Everything a scan tells its consumer, in delivery order.
///
/// Exactly one of the terminal variants (`Completed`, `Canceled`, `Failed`)
/// is delivered per scan and nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Result(ProbeResult),
    Progress { completed: u64, total: u64 },
    Completed,
    Canceled,
    /// The scan could not be orchestrated (worker pool, supervisor or task failure).
    Failed(String),
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Completed | ScanEvent::Canceled | ScanEvent::Failed(_)
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Canceled,
    Failed(String),
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Completed => "completed",
            ScanOutcome::Canceled => "canceled",
            ScanOutcome::Failed(_) => "failed",
        }
    }
}

/// Aggregate of a drained [`crate::stream::ResultStream`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanSummary {
    pub total: u64,
    pub completed: u64,
    pub open: u64,
    pub outcome: ScanOutcome,
    pub results: Vec<ProbeResult>,
    pub started_at: String,
    pub finished_at: String,
}

impl ScanSummary {
    pub fn new(total: u64, started_at: String) -> Self {
        Self {
            total,
            completed: 0,
            open: 0,
            outcome: ScanOutcome::Failed("stream closed without a terminal signal".into()),
            results: Vec::new(),
            started_at,
            finished_at: String::new(),
        }
    }

    /// Fold one stream event into the summary.
    pub fn record(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Result(result) => {
                if result.state.is_open() {
                    self.open += 1;
                }
                self.results.push(result);
            }
            ScanEvent::Progress { completed, .. } => self.completed = completed,
            ScanEvent::Completed => self.outcome = ScanOutcome::Completed,
            ScanEvent::Canceled => self.outcome = ScanOutcome::Canceled,
            ScanEvent::Failed(reason) => self.outcome = ScanOutcome::Failed(reason),
        }
    }
}
