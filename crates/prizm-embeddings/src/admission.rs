//! Inference admission control.
//!
//! A bounded FIFO semaphore: at most `max_concurrency` inference calls run
//! at once, the rest wait in arrival order. Slots are handed over directly
//! on release, so `active` never dips below the true number of running
//! callers between a release and the next admission.
//!
//! [`InferenceSlotQueue::drain`] (used on dispose) rejects every waiter and
//! starts a new epoch. Permits from an older epoch release as no-ops, so
//! callers that were already running when the model was disposed can
//! neither drive the count negative nor steal capacity from the next
//! model instance.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::ServiceError;

/// Outcome delivered to a queued caller: the epoch its slot belongs to.
type Grant = Result<u64, ServiceError>;

#[derive(Debug)]
struct QueueState {
    active: usize,
    max: usize,
    epoch: u64,
    waiters: VecDeque<oneshot::Sender<Grant>>,
}

impl QueueState {
    /// Hand free slots to the oldest waiters still listening.
    fn admit_waiters(&mut self) {
        while self.active < self.max {
            let Some(tx) = self.waiters.pop_front() else {
                break;
            };
            // A closed receiver means the caller gave up; skip it.
            if tx.send(Ok(self.epoch)).is_ok() {
                self.active += 1;
            }
        }
    }
}

/// Bounded, FIFO-fair admission queue for inference calls.
#[derive(Debug)]
pub struct InferenceSlotQueue {
    state: Mutex<QueueState>,
}

impl InferenceSlotQueue {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                active: 0,
                max: max_concurrency.max(1),
                epoch: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_concurrency(&self) -> usize {
        self.lock().max
    }

    /// Change the concurrency cap. Raising it admits waiters immediately;
    /// lowering it lets running callers finish.
    pub fn set_max_concurrency(&self, max: usize) {
        let mut state = self.lock();
        state.max = max.max(1);
        state.admit_waiters();
    }

    /// Callers currently holding a slot.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.lock().waiters.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Wait for a free slot.
    ///
    /// Returns immediately when under the cap. Fails with
    /// [`ServiceError::Disposed`] if the queue is drained while waiting.
    pub async fn acquire(self: &Arc<Self>) -> Result<SlotPermit, ServiceError> {
        let rx = {
            let mut state = self.lock();
            if state.active < state.max {
                state.active += 1;
                return Ok(SlotPermit {
                    queue: Arc::clone(self),
                    epoch: state.epoch,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            trace!(queued = state.waiters.len(), "Inference slot queued");
            rx
        };

        let mut pending = PendingSlot {
            queue: Arc::clone(self),
            rx,
            settled: false,
        };
        let grant = (&mut pending.rx).await;
        pending.settled = true;

        match grant {
            Ok(Ok(epoch)) => Ok(SlotPermit {
                queue: Arc::clone(self),
                epoch,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ServiceError::Disposed),
        }
    }

    fn release(&self, epoch: u64) {
        let mut state = self.lock();
        if epoch != state.epoch {
            // Issued before the last drain; that slot no longer exists.
            return;
        }
        state.active = state.active.saturating_sub(1);
        state.admit_waiters();
    }

    /// Reject every waiter with [`ServiceError::Disposed`] and forget all
    /// admitted slots. Returns the number of callers rejected.
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        state.epoch += 1;
        state.active = 0;
        let mut rejected = 0;
        for tx in state.waiters.drain(..) {
            if tx.send(Err(ServiceError::Disposed)).is_ok() {
                rejected += 1;
            }
        }
        rejected
    }
}

/// An admitted inference slot, released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    queue: Arc<InferenceSlotQueue>,
    epoch: u64,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.queue.release(self.epoch);
    }
}

/// A queued caller. If the caller is dropped after a slot was handed to it
/// but before it saw the grant, the slot goes back to the queue.
struct PendingSlot {
    queue: Arc<InferenceSlotQueue>,
    rx: oneshot::Receiver<Grant>,
    settled: bool,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(Ok(epoch)) = self.rx.try_recv() {
            self.queue.release(epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_admits_up_to_max_without_waiting() {
        let queue = Arc::new(InferenceSlotQueue::new(2));
        let a = queue.acquire().await.unwrap();
        let b = queue.acquire().await.unwrap();
        assert_eq!(queue.active(), 2);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire().await.map(|_p| ()) })
        };
        settle().await;
        assert_eq!(queue.queued(), 1);
        assert!(!waiter.is_finished());

        drop(a);
        waiter.await.unwrap().unwrap();
        drop(b);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_fifo_handoff() {
        let queue = Arc::new(InferenceSlotQueue::new(1));
        let first = queue.acquire().await.unwrap();
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        for i in 0..3 {
            let queue = Arc::clone(&queue);
            let order_tx = order_tx.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = queue.acquire().await.unwrap();
                order_tx.send(i).unwrap();
            }));
            settle().await;
        }
        assert_eq!(queue.queued(), 3);

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        let mut order = Vec::new();
        while let Ok(i) = order_rx.try_recv() {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_drain_rejects_waiters() {
        let queue = Arc::new(InferenceSlotQueue::new(1));
        let running = queue.acquire().await.unwrap();

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            waiters.push(tokio::spawn(async move { queue.acquire().await.map(|_| ()) }));
        }
        settle().await;

        assert_eq!(queue.drain(), 3);
        for w in waiters {
            let result = tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result, Err(ServiceError::Disposed));
        }
        assert_eq!(queue.active(), 0);

        // Release of a pre-drain permit is a no-op.
        drop(running);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_stale_release_does_not_steal_new_slot() {
        let queue = Arc::new(InferenceSlotQueue::new(1));
        let stale = queue.acquire().await.unwrap();
        queue.drain();

        let fresh = queue.acquire().await.unwrap();
        assert_eq!(queue.active(), 1);
        drop(stale);
        assert_eq!(queue.active(), 1);
        drop(fresh);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let queue = Arc::new(InferenceSlotQueue::new(1));
        let held = queue.acquire().await.unwrap();

        let cancelled = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire().await.map(|_| ()) })
        };
        let patient = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire().await.map(|_| ()) })
        };
        settle().await;
        cancelled.abort();
        settle().await;
        assert_eq!(queue.queued(), 1);

        drop(held);
        patient.await.unwrap().unwrap();
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_raising_cap_admits_waiters() {
        let queue = Arc::new(InferenceSlotQueue::new(1));
        let _held = queue.acquire().await.unwrap();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.acquire().await.map(|_| ()) })
        };
        settle().await;

        queue.set_max_concurrency(2);
        waiter.await.unwrap().unwrap();
        assert_eq!(queue.max_concurrency(), 2);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let queue = InferenceSlotQueue::new(0);
        assert_eq!(queue.max_concurrency(), 1);
    }
}
