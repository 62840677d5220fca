use crate::stream::EventSink;
use crate::types::ScanEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Counts finished probe units and publishes `(completed, total)` on the scan's stream.
///
/// Increment and publication happen under one lock so the published values
/// are strictly increasing even with many workers finishing at once.
#[derive(Debug)]
pub(crate) struct ProgressAggregator {
    completed: AtomicU64,
    total: u64,
    publish: Mutex<()>,
    sink: EventSink,
}

impl ProgressAggregator {
    pub(crate) fn new(total: u64, sink: EventSink) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            publish: Mutex::new(()),
            sink,
        }
    }

    /// Record one finished unit. Returns the new count.
    pub(crate) async fn record_unit_done(&self) -> u64 {
        let _turn = self.publish.lock().await;
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(completed <= self.total, "more units finished than scheduled");
        self.sink
            .emit(ScanEvent::Progress {
                completed,
                total: self.total,
            })
            .await;
        completed
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel;
    use std::sync::Arc;
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_exact_and_monotonic() {
        let total = 200;
        let (sink, mut stream) = channel(512, total, CancellationToken::new());
        let progress = Arc::new(ProgressAggregator::new(total, sink.clone()));

        let mut set = JoinSet::new();
        for _ in 0..total {
            let progress = progress.clone();
            set.spawn(async move { progress.record_unit_done().await });
        }
        while set.join_next().await.is_some() {}
        sink.try_finish(ScanEvent::Completed);
        drop(sink);
        drop(progress);

        let mut last = 0;
        let mut seen = 0;
        while let Some(event) = stream.next().await {
            if let ScanEvent::Progress { completed, total: t } = event {
                assert_eq!(t, total);
                assert!(completed > last);
                last = completed;
                seen += 1;
            }
        }
        assert_eq!(last, total);
        assert_eq!(seen, total);
    }
}
