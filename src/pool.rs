//! Worker pool bounding concurrent engine invocations
//!
//! A [`WorkerPool`] hands out at most `max_workers` [`WorkerSlot`]s at a time.
//! Callers that find every slot taken wait in a bounded queue; once the queue
//! is full further callers are rejected immediately so memory stays bounded
//! under load. A slot is returned when it is dropped, which makes release
//! unconditional on every exit path (success, error, panic, timeout).

use crate::error::{Exhaustion, Result, ServiceError};
use instant::{Duration, Instant};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Pool statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured concurrency bound
    pub max_workers: usize,
    /// Configured wait queue bound
    pub queue_capacity: usize,
    /// Slots currently held
    pub in_flight: usize,
    /// Callers currently waiting for a slot
    pub waiting: usize,
    /// Highest number of slots ever held at once
    pub peak_in_flight: usize,
    /// Slots released so far
    pub completed: u64,
    /// Callers turned away (queue full, wait timeout, closed)
    pub rejected: u64,
    /// Whether the pool still accepts work
    pub accepting: bool,
}

#[derive(Debug, Default)]
struct PoolCounters {
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    idle: Notify,
}

/// Permission to run one engine invocation
///
/// Dropping the slot returns it to the pool exactly once.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<PoolCounters>,
    acquired_at: Instant,
}

impl WorkerSlot {
    /// When the slot was handed out
    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// How long the slot has been held
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Return the slot to the pool
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let previous = self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        if previous == 1 {
            self.counters.idle.notify_waiters();
        }
    }
}

/// Decrements the waiting counter when the waiting caller leaves the queue,
/// including when its future is dropped mid-wait
struct QueueTicket<'a> {
    counters: &'a PoolCounters,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded concurrency controller for engine invocations
#[derive(Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    queue_capacity: usize,
    queue_timeout: Option<Duration>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots and room for `queue_capacity`
    /// waiting callers
    ///
    /// # Errors
    /// - `max_workers` is zero
    pub fn new(max_workers: usize, queue_capacity: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(ServiceError::invalid_config(
                "Worker pool needs at least one worker",
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            queue_capacity,
            queue_timeout: None,
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Bound how long a caller may wait in the queue
    #[must_use]
    pub fn with_queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> WorkerSlot {
        let now_in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);
        WorkerSlot {
            _permit: permit,
            counters: Arc::clone(&self.counters),
            acquired_at: Instant::now(),
        }
    }

    fn reject(&self, reason: Exhaustion) -> ServiceError {
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            reason = %reason,
            in_flight = self.counters.in_flight.load(Ordering::SeqCst),
            waiting = self.counters.waiting.load(Ordering::SeqCst),
            "worker slot request rejected"
        );
        ServiceError::ResourceExhausted(reason)
    }

    /// Take a slot only if one is free right now
    ///
    /// # Errors
    /// - `ResourceExhausted(QueueFull)` when every slot is held
    /// - `ResourceExhausted(Closed)` after [`WorkerPool::close`]
    pub fn try_acquire(&self) -> Result<WorkerSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(self.issue(permit)),
            Err(TryAcquireError::NoPermits) => Err(self.reject(Exhaustion::QueueFull)),
            Err(TryAcquireError::Closed) => Err(self.reject(Exhaustion::Closed)),
        }
    }

    /// Wait for a slot
    ///
    /// Returns immediately when a slot is free. Otherwise the caller joins the
    /// wait queue if it has room, and waits (up to the queue timeout, when
    /// configured) for a slot to be released.
    ///
    /// # Errors
    /// - `ResourceExhausted(QueueFull)` when the wait queue is full
    /// - `ResourceExhausted(WaitTimeout)` when the queue timeout elapses
    /// - `ResourceExhausted(Closed)` when the pool is closed
    pub async fn acquire(&self) -> Result<WorkerSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.issue(permit)),
            Err(TryAcquireError::Closed) => return Err(self.reject(Exhaustion::Closed)),
            Err(TryAcquireError::NoPermits) => {},
        }

        let capacity = self.queue_capacity;
        if self
            .counters
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                (w < capacity).then_some(w + 1)
            })
            .is_err()
        {
            return Err(self.reject(Exhaustion::QueueFull));
        }
        let ticket = QueueTicket {
            counters: &self.counters,
        };

        let wait = Arc::clone(&self.semaphore).acquire_owned();
        let acquired = match self.queue_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => {
                    drop(ticket);
                    return Err(self.reject(Exhaustion::WaitTimeout));
                },
            },
            None => wait.await,
        };
        drop(ticket);

        match acquired {
            Ok(permit) => Ok(self.issue(permit)),
            Err(_) => Err(self.reject(Exhaustion::Closed)),
        }
    }

    /// Stop handing out slots; waiting callers are rejected
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Resolve once no slot is held
    pub async fn drain(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            queue_capacity: self.queue_capacity,
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            accepting: !self.semaphore.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::new(0, 4),
            Err(ServiceError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_slot_is_released_on_drop() {
        let pool = WorkerPool::new(1, 0).unwrap();
        let slot = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_flight, 1);
        assert!(pool.try_acquire().is_err());

        slot.release();

        assert_eq!(pool.stats().in_flight, 0);
        assert_eq!(pool.stats().completed, 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_with_backpressure() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        while pool.stats().waiting == 0 {
            tokio::task::yield_now().await;
        }

        let rejected = pool.acquire().await;
        assert!(matches!(
            rejected,
            Err(ServiceError::ResourceExhausted(Exhaustion::QueueFull))
        ));
        assert_eq!(pool.stats().rejected, 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_queue_timeout() {
        let pool = WorkerPool::new(1, 4)
            .unwrap()
            .with_queue_timeout(Some(Duration::from_millis(20)));
        let _held = pool.acquire().await.unwrap();

        let result = pool.acquire().await;
        assert!(matches!(
            result,
            Err(ServiceError::ResourceExhausted(Exhaustion::WaitTimeout))
        ));
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_bound() {
        let pool = Arc::new(WorkerPool::new(3, 64).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let active = Arc::clone(&active);
                let observed_max = Arc::clone(&observed_max);
                tokio::spawn(async move {
                    let _slot = pool.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    observed_max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(observed_max.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats();
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(stats.completed, 32);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_close_rejects_and_drain_waits_for_holders() {
        let pool = Arc::new(WorkerPool::new(2, 4).unwrap());
        let slot = pool.acquire().await.unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.acquire().await,
            Err(ServiceError::ResourceExhausted(Exhaustion::Closed))
        ));

        let drained = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.drain().await })
        };
        tokio::task::yield_now().await;
        assert!(!drained.is_finished());

        drop(slot);
        drained.await.unwrap();
        assert!(!pool.stats().accepting);
    }
}
