//! Background worker pool
//!
//! A fixed set of tokio tasks drains one unbounded job queue. Submitting
//! never blocks or awaits, so it is safe from inside a synchronous lock.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Counts queued plus running jobs and wakes idle waiters at zero
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: Arc<Pending>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn new(workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(Pending::default());

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let pending = pending.clone();
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            error!(worker = id, "Background job panicked");
                        }
                        pending.leave();
                    }
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            pending,
            handles: Mutex::new(handles),
        }
    }

    /// Queue a job. Returns `false` once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return false;
        };

        self.pending.enter();
        if tx.send(Box::pin(job)).is_err() {
            self.pending.leave();
            return false;
        }
        true
    }

    /// Queue a job and get its output through a channel. `None` once the
    /// pool has been shut down.
    pub fn submit_with_result<F, T>(&self, job: F) -> Option<oneshot::Receiver<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = self.submit(async move {
            let _ = tx.send(job.await);
        });
        queued.then_some(rx)
    }

    /// Number of queued or running jobs
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Resolve once no job is queued or running, including jobs submitted
    /// by other jobs.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting jobs and wait for the queue to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
