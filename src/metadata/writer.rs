//! Asynchronous metadata writer
//!
//! Records are queued on a bounded channel and written by a single background
//! task. A failed write is retried with exponential backoff up to the policy's
//! attempt limit, then logged and dropped. When the queue is full new records
//! are dropped with a warning; the request that produced them is never
//! delayed.

use super::{ImageMetadata, MetadataStore};
use crate::error::{Result, ServiceError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Default number of queued records
pub const DEFAULT_WRITER_CAPACITY: usize = 256;

/// Retry schedule for failed writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16))
    }
}

/// Writer counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub written: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct WriterCounters {
    written: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum Command {
    Insert(ImageMetadata),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background metadata writer
pub struct MetadataWriter {
    store: Arc<dyn MetadataStore>,
    sender: mpsc::Sender<Command>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<WriterCounters>,
}

impl MetadataWriter {
    /// Spawn the writer task on the current runtime
    #[must_use]
    pub fn spawn(store: Arc<dyn MetadataStore>, capacity: usize, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let counters = Arc::new(WriterCounters::default());

        tracker.spawn(run(
            Arc::clone(&store),
            receiver,
            policy,
            Arc::clone(&counters),
            cancel.clone(),
        ));
        tracker.close();

        tracing::debug!(
            backend = store.backend_name(),
            capacity,
            max_attempts = policy.max_attempts,
            "metadata writer started"
        );

        Self {
            store,
            sender,
            cancel,
            tracker,
            counters,
        }
    }

    /// Store used for reads and by the writer task
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Queue a record for writing without waiting
    ///
    /// Returns `false` if the record was dropped (queue full or writer
    /// stopped).
    pub fn submit(&self, record: ImageMetadata) -> bool {
        match self.sender.try_send(Command::Insert(record)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Command::Insert(record))) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(image_id = %record.id, "metadata queue full, record dropped");
                false
            },
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!("metadata writer stopped, record dropped");
                false
            },
        }
    }

    /// Wait until every record queued before this call has been handled
    ///
    /// # Errors
    /// - `Storage` if the writer task has stopped
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(Command::Flush(ack))
            .await
            .map_err(|_| ServiceError::storage("Metadata writer is not running"))?;
        done.await
            .map_err(|_| ServiceError::storage("Metadata writer stopped before flushing"))
    }

    /// Flush outstanding records and stop the writer task
    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            tracing::debug!(error = %e, "metadata writer already stopped");
        }
        self.cancel.cancel();
        self.tracker.wait().await;
        tracing::debug!(stats = ?self.stats(), "metadata writer stopped");
    }

    #[must_use]
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            written: self.counters.written.load(Ordering::SeqCst),
            retried: self.counters.retried.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for MetadataWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataWriter")
            .field("backend", &self.store.backend_name())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn run(
    store: Arc<dyn MetadataStore>,
    mut receiver: mpsc::Receiver<Command>,
    policy: RetryPolicy,
    counters: Arc<WriterCounters>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            command = receiver.recv() => match command {
                Some(Command::Insert(record)) => {
                    write_with_retry(store.as_ref(), record, policy, &counters).await;
                },
                Some(Command::Flush(ack)) => {
                    let _ = ack.send(());
                },
                None => break,
            },
            () = cancel.cancelled() => break,
        }
    }
}

async fn write_with_retry(
    store: &dyn MetadataStore,
    record: ImageMetadata,
    policy: RetryPolicy,
    counters: &WriterCounters,
) {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match store.insert(record.clone()).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(image_id = %record.id, attempt, "metadata persisted");
                return;
            },
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                counters.retried.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    image_id = %record.id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "metadata write failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    image_id = %record.id,
                    attempts,
                    error = %e,
                    "metadata write failed, giving up"
                );
            },
        }
    }
}
