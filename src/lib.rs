//! Bounded-concurrency network probe engine.
//!
//! [`ScanEngine::scan`] fans a set of hosts × ports out over a private worker
//! pool, limited at the host level and per host at the port level, and streams
//! every result, progress update and the terminal signal through one
//! [`ResultStream`].
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod lookup;
pub mod netdetect;
pub mod ports;
pub mod probe;
mod progress;
pub mod server;
pub mod stream;
pub mod types;

pub use config::ScanConfig;
pub use engine::ScanEngine;
pub use error::EngineError;
pub use probe::{Probe, TcpConnectProbe};
pub use stream::ResultStream;
pub use types::{PortInfo, PortState, ProbeResult, Protocol, ScanEvent, ScanOutcome, ScanSummary};
