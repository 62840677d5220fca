use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Hard ceiling on slots in a single limiter.
pub const MAX_SLOTS: usize = 5_000;

/// Admission gate bounding how much work runs at once.
///
/// Backed by a tokio `Semaphore`, which hands out permits in FIFO order so
/// waiters cannot starve.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// Result of waiting for a slot.
#[derive(Debug)]
pub enum Admission {
    Granted(Slot),
    Canceled,
}

/// A held slot. Dropping it (or calling [`Slot::release`]) frees the slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn release(self) {}
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_SLOTS);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, giving up as soon as `cancel` fires.
    ///
    /// Cancellation wins when both are ready at once.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Admission {
        if cancel.is_cancelled() {
            return Admission::Canceled;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Admission::Canceled,
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => Admission::Granted(Slot { _permit: permit }),
                // closed semaphore: nothing more will be admitted
                Err(_) => Admission::Canceled,
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
