//! Errors that end a scan without a `Completed` or `Canceled` signal.
//!
//! Probe-level failures never show up here: they collapse into
//! [`crate::types::PortState::Closed`] on the result itself.

use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The scan's private runtime could not be built.
    #[error("failed to provision scan worker pool: {0}")]
    WorkerPool(#[source] std::io::Error),

    /// The thread that owns the scan runtime could not be started.
    #[error("failed to start scan supervisor: {0}")]
    Supervisor(#[source] std::io::Error),

    /// A host or port worker panicked or was aborted.
    #[error("scan worker failed: {0}")]
    Worker(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Worker(err.to_string())
    }
}
