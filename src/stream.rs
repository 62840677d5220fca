//! Delivery channel between a running scan and its consumer.
//!
//! Results, progress and the terminal signal share one bounded channel so the
//! consumer always sees them in the order they were produced. Producers wait
//! for room instead of dropping events, but stop waiting once the scan is
//! canceled.

use crate::types::{ScanEvent, ScanSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Default number of buffered events before producers block.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn channel(
    capacity: usize,
    total: u64,
    cancel: CancellationToken,
) -> (EventSink, ResultStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = EventSink {
        tx,
        cancel,
        finished: Arc::new(AtomicBool::new(false)),
    };
    let stream = ResultStream {
        rx,
        total,
        done: false,
        started_at: now_rfc3339(),
    };
    (sink, stream)
}

/// Producer half, cloned into every worker of a scan.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<ScanEvent>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl EventSink {
    /// Deliver a result or progress event, waiting while the consumer is behind.
    ///
    /// Returns `false` when the event was discarded: either the scan is
    /// canceled or the consumer is gone. A vanished consumer cancels the scan.
    pub(crate) async fn emit(&self, event: ScanEvent) -> bool {
        debug_assert!(!event.is_terminal());
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("result consumer dropped, canceling scan");
                    self.cancel.cancel();
                    false
                }
            },
        }
    }

    /// Deliver the terminal signal, waiting for the consumer to make room.
    /// Only the first terminal call has any effect.
    ///
    /// Must be called from a plain thread, never from inside a runtime.
    pub(crate) fn finish_blocking(&self, event: ScanEvent) {
        debug_assert!(event.is_terminal());
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        // consumer may already be gone; nothing left to tell it
        let _ = self.tx.blocking_send(event);
    }

    /// Non-waiting variant of [`Self::finish_blocking`]. Only valid while the
    /// channel is known to have room.
    pub(crate) fn try_finish(&self, event: ScanEvent) {
        debug_assert!(event.is_terminal());
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::error!(?event, "terminal signal lost: result channel full");
        }
    }
}

/// Consumer half of a scan, returned by [`crate::engine::ScanEngine::scan`].
///
/// Dropping the stream cancels the scan.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<ScanEvent>,
    total: u64,
    done: bool,
    started_at: String,
}

impl ResultStream {
    /// Number of probe units the scan was asked to run.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Next event, or `None` once the terminal signal has been returned.
    pub async fn next(&mut self) -> Option<ScanEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event)
    }

    /// Blocking variant of [`Self::next`] for use outside an async context.
    pub fn blocking_next(&mut self) -> Option<ScanEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.blocking_recv();
        self.observe(event)
    }

    fn observe(&mut self, event: Option<ScanEvent>) -> Option<ScanEvent> {
        match &event {
            Some(e) if e.is_terminal() => {
                self.done = true;
                self.rx.close();
            }
            None => self.done = true,
            Some(_) => {}
        }
        event
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Drain the stream into a summary.
    pub async fn collect(mut self) -> ScanSummary {
        let mut summary = ScanSummary::new(self.total, self.started_at.clone());
        while let Some(event) = self.next().await {
            summary.record(event);
        }
        summary.finished_at = now_rfc3339();
        summary
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
