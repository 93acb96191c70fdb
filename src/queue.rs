//! Concurrency-limited task queue
//!
//! Every remote-heavy operation in this crate (host resolution, probe
//! creation, alarm resolution) fans its work out through a [`TaskQueue`].
//! The queue owns a dispatcher task that keeps at most `limit` worker
//! futures in flight; excess items wait in FIFO order and are dispatched as
//! running workers finish.
//!
//! ## Lifecycle
//!
//! ```text
//! push(item)* → close() → wait() → Ok(()) | first Err
//! ```
//!
//! The terminal signal is a oneshot channel resolved exactly once: success
//! after `close()` has been called and every submitted item has completed,
//! or the first worker error observed. Failure is fail-fast: waiting items
//! are discarded and never dispatched, while workers already in flight are
//! detached to run to completion without being awaited again.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{Error, Result};

enum Msg<T> {
    Item(T),
    Close,
}

/// Handle owning a dispatcher task with bounded worker concurrency
///
/// Created with a worker function that turns each pushed item into a
/// future. `wait()` consumes the queue and resolves to the terminal signal;
/// it closes the queue first if the caller has not, so a queue can never
/// hang for want of a `close()`.
pub struct TaskQueue<T> {
    sender: QueueSender<T>,
    done: oneshot::Receiver<Result<()>>,
}

/// Cloneable push-only handle to a [`TaskQueue`]
///
/// Lets worker functions of one queue feed another (the reconciliation
/// engine's group queue pushes into its apply queue this way).
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<Msg<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue an item for dispatch
    ///
    /// Returns [`Error::QueueMisuse`] once the queue has been closed. A
    /// queue that already failed accepts further pushes and ignores them;
    /// `wait()` reports the original error.
    pub fn push(&self, item: T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueMisuse("push after close".to_string()));
        }

        // A send error means the dispatcher already exited with a failure;
        // the item is moot at that point.
        let _ = self.tx.send(Msg::Item(item));
        Ok(())
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a queue and spawn its dispatcher
    ///
    /// `limit` is clamped to at least 1. The worker is invoked once per
    /// item, in FIFO push order; completion order is whatever finishes
    /// first.
    pub fn new<W, Fut>(limit: usize, worker: W) -> Self
    where
        W: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(dispatch(rx, limit.max(1), worker, done_tx));

        Self {
            sender: QueueSender {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            done: done_rx,
        }
    }

    /// Enqueue an item for dispatch
    pub fn push(&self, item: T) -> Result<()> {
        self.sender.push(item)
    }

    /// A cloneable push-only handle
    pub fn sender(&self) -> QueueSender<T> {
        self.sender.clone()
    }

    /// Declare that no more items will be pushed
    ///
    /// Idempotent. All pushes that returned `Ok` before this call are still
    /// dispatched; the success signal fires once they have all completed.
    pub fn close(&self) {
        if self.sender.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.tx.send(Msg::Close);
    }

    /// Await the terminal signal, closing the queue first if needed
    pub async fn wait(self) -> Result<()> {
        self.close();
        match self.done.await {
            Ok(result) => result,
            // The dispatcher sends the signal before exiting on every path,
            // so this only fires if it panicked.
            Err(_) => Err(Error::RemoteFailure(
                "task queue dispatcher terminated unexpectedly".to_string(),
            )),
        }
    }
}

async fn dispatch<T, W, Fut>(
    mut rx: mpsc::UnboundedReceiver<Msg<T>>,
    limit: usize,
    mut worker: W,
    done: oneshot::Sender<Result<()>>,
) where
    W: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
    T: Send + 'static,
{
    let mut waiting: VecDeque<T> = VecDeque::new();
    let mut running: JoinSet<Result<()>> = JoinSet::new();
    let mut closing = false;

    loop {
        while running.len() < limit {
            match waiting.pop_front() {
                Some(item) => {
                    running.spawn(worker(item));
                }
                None => break,
            }
        }

        if closing && waiting.is_empty() && running.is_empty() {
            let _ = done.send(Ok(()));
            return;
        }

        tokio::select! {
            msg = rx.recv(), if !closing => {
                match msg {
                    Some(Msg::Item(item)) => waiting.push_back(item),
                    Some(Msg::Close) => closing = true,
                    // Every sender dropped without close(): the owner
                    // abandoned the queue and nobody holds the terminal
                    // signal receiver either. Leave in-flight work to
                    // finish detached and stop dispatching.
                    None => {
                        if !waiting.is_empty() {
                            warn!(pending = waiting.len(), "task queue abandoned with waiting items");
                        }
                        running.detach_all();
                        return;
                    }
                }
            }

            res = running.join_next(), if !running.is_empty() => {
                let failure = match res {
                    Some(Ok(Ok(()))) => None,
                    Some(Ok(Err(err))) => Some(err),
                    Some(Err(join_err)) => Some(Error::RemoteFailure(format!(
                        "queue worker panicked: {join_err}"
                    ))),
                    None => None,
                };

                if let Some(err) = failure {
                    // Fail fast: report the first error, drop everything
                    // still waiting, let in-flight workers finish on their
                    // own without being awaited (no double reporting).
                    let _ = done.send(Err(err));
                    running.detach_all();
                    return;
                }
            }
        }
    }
}
