//! Bounded background work queue.
//!
//! Writes that must not delay a response (cache fills, log ingestion) are
//! handed to a [`BackgroundQueue`]. A single worker task drains the queue and
//! runs an async handler per item. The queue never blocks the producer: when
//! it is full the item is dropped and counted.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Errors returned when enqueuing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity; the item was dropped.
    #[error("Queue '{0}' is full")]
    Full(&'static str),

    /// The queue has been shut down.
    #[error("Queue '{0}' is closed")]
    Closed(&'static str),
}

/// Counters describing a queue's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Items whose handler succeeded.
    pub processed: u64,
    /// Items whose handler returned an error.
    pub failed: u64,
    /// Items rejected because the queue was full.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum Message<T> {
    Item(T),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// A bounded queue drained by one worker task.
///
/// # Example
///
/// ```
/// use shared::tasks::BackgroundQueue;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let queue = BackgroundQueue::spawn("example", 16, move |n: usize| {
///     let counter = Arc::clone(&counter);
///     async move {
///         counter.fetch_add(n, Ordering::SeqCst);
///         Ok::<_, std::convert::Infallible>(())
///     }
/// });
///
/// queue.try_enqueue(2).unwrap();
/// queue.try_enqueue(3).unwrap();
/// queue.flush().await;
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// # });
/// ```
pub struct BackgroundQueue<T> {
    name: &'static str,
    sender: mpsc::Sender<Message<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl<T> std::fmt::Debug for BackgroundQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> BackgroundQueue<T> {
    /// Spawns the worker task on the current Tokio runtime.
    ///
    /// `capacity` is clamped to at least one slot.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F, Fut, E>(name: &'static str, capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(name, receiver, handler, Arc::clone(&counters)));

        tracing::debug!(queue = name, capacity, "Background queue started");

        Self {
            name,
            sender,
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// Enqueues an item without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] if the queue is at capacity (the item is
    /// dropped and counted) or [`QueueError::Closed`] after shutdown.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        match self.sender.try_send(Message::Item(item)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(queue = self.name, "Background queue full, dropping item");
                Err(QueueError::Full(self.name))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed(self.name)),
        }
    }

    /// Waits until every item enqueued before this call has been handled.
    ///
    /// Returns immediately if the queue has been shut down.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops accepting items, drains what is queued, and waits for the worker
    /// to exit.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(Message::Shutdown).await;

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(queue = self.name, error = %e, "Background worker panicked");
            }
        }
    }
}

impl<T> BackgroundQueue<T> {
    /// Returns the queue's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns a snapshot of the queue counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker<T, F, Fut, E>(
    name: &'static str,
    mut receiver: mpsc::Receiver<Message<T>>,
    handler: F,
    counters: Arc<Counters>,
) where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Item(item) => match handler(item).await {
                Ok(()) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(queue = name, error = %e, "Background task failed");
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => receiver.close(),
        }
    }
    tracing::debug!(queue = name, "Background queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn summing_queue(capacity: usize) -> (BackgroundQueue<usize>, Arc<AtomicUsize>) {
        let total = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&total);
        let queue = BackgroundQueue::spawn("test", capacity, move |n: usize| {
            let sink = Arc::clone(&sink);
            async move {
                if n == 0 {
                    return Err("zero is not allowed");
                }
                sink.fetch_add(n, Ordering::SeqCst);
                Ok(())
            }
        });
        (queue, total)
    }

    #[tokio::test]
    async fn test_flush_waits_for_prior_items() {
        let (queue, total) = summing_queue(8);

        for n in 1..=4 {
            queue.try_enqueue(n).unwrap();
        }
        queue.flush().await;

        assert_eq!(total.load(Ordering::SeqCst), 10);
        assert_eq!(
            queue.stats(),
            QueueStats {
                processed: 4,
                failed: 0,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_handler_errors_are_counted() {
        let (queue, total) = summing_queue(8);

        queue.try_enqueue(0).unwrap();
        queue.try_enqueue(5).unwrap();
        queue.flush().await;

        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_items() {
        let gate = Arc::new(Notify::new());
        let blocker = Arc::clone(&gate);
        let queue = BackgroundQueue::spawn("blocked", 1, move |(): ()| {
            let blocker = Arc::clone(&blocker);
            async move {
                blocker.notified().await;
                Ok::<_, std::convert::Infallible>(())
            }
        });

        // The first item is taken by the worker, the second fills the buffer.
        queue.try_enqueue(()).unwrap();
        tokio::task::yield_now().await;
        queue.try_enqueue(()).unwrap();

        assert_eq!(queue.try_enqueue(()), Err(QueueError::Full("blocked")));
        assert_eq!(queue.stats().dropped, 1);

        gate.notify_one();
        tokio::task::yield_now().await;
        gate.notify_one();
        queue.flush().await;
        assert_eq!(queue.stats().processed, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_closes() {
        let (queue, total) = summing_queue(8);

        queue.try_enqueue(7).unwrap();
        queue.shutdown().await;

        assert_eq!(total.load(Ordering::SeqCst), 7);
        assert_eq!(queue.try_enqueue(1), Err(QueueError::Closed("test")));

        // Flushing or shutting down again is a no-op.
        queue.flush().await;
        queue.shutdown().await;
    }
}
