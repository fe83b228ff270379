//! FIFO admission of operations under a concurrency cap

use crate::backend::BackendFailure;
use crate::errors::{RecoveryHint, Result, StoreError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tracing::debug;

pub(crate) struct OperationQueue {
    slots: Semaphore,
    queued: AtomicUsize,
    active: AtomicUsize,
    max_depth: Option<usize>,
    closed: AtomicBool,
    idle: Notify,
}

/// An in-flight slot; dropping it lets the next queued operation run
pub(crate) struct Slot<'a> {
    queue: &'a OperationQueue,
    _permit: SemaphorePermit<'a>,
}

/// Counts a waiter as queued until it is dispatched or abandoned
struct Waiting<'a>(&'a OperationQueue);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::SeqCst);
        self.0.notify_if_idle();
    }
}

impl OperationQueue {
    pub(crate) fn new(max_concurrent: usize, max_depth: Option<usize>) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_depth,
            closed: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Wait for a free slot; tokio's semaphore hands out permits in request order
    pub(crate) async fn admit(&self, operation: &'static str) -> Result<Slot<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed {
                recovery_hint: RecoveryHint::NoRecovery,
            });
        }
        let depth = self.queued.fetch_add(1, Ordering::SeqCst);
        let waiting = Waiting(self);
        if let Some(max) = self.max_depth {
            if depth >= max {
                return Err(StoreError::OperationFailed {
                    operation,
                    store: None,
                    failure: BackendFailure::Busy(format!("operation queue is full ({max} waiting)")),
                    recovery_hint: RecoveryHint::Retry {
                        after: Duration::from_millis(50),
                    },
                });
            }
        }
        debug!(operation, queued = depth + 1, "Operation queued");

        let permit = self.slots.acquire().await.map_err(|_| StoreError::Closed {
            recovery_hint: RecoveryHint::NoRecovery,
        })?;
        self.active.fetch_add(1, Ordering::SeqCst);
        drop(waiting);
        Ok(Slot {
            queue: self,
            _permit: permit,
        })
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_idle(&self) -> bool {
        self.queued() == 0 && self.active() == 0
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Stop admitting and wait up to `timeout` for admitted work to finish.
    /// Returns false when the timeout elapsed first.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.is_idle() {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.queue.active.fetch_sub(1, Ordering::SeqCst);
        self.queue.notify_if_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn caps_concurrency() {
        let queue = Arc::new(OperationQueue::new(2, None));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let queue = Arc::clone(&queue);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _slot = queue.admit("test").await.unwrap();
                peak.fetch_max(queue.active(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.active(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn rejects_beyond_depth() {
        let queue = Arc::new(OperationQueue::new(1, Some(1)));
        let held = queue.admit("hold").await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.admit("wait").await.map(|_| ()) })
        };
        while queue.queued() == 0 {
            tokio::task::yield_now().await;
        }

        let err = queue.admit("overflow").await.err().unwrap();
        assert!(err.is_transient());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drain_waits_for_active_work() {
        let queue = Arc::new(OperationQueue::new(1, None));
        let worker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let _slot = queue.admit("slow").await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        while queue.active() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(queue.drain(Duration::from_secs(1)).await);
        assert!(matches!(queue.admit("late").await, Err(StoreError::Closed { .. })));
        worker.await.unwrap();
    }
}
