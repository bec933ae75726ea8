//! Work queues for queued (production) dispatch
//!
//! In queued mode the bus hands each matched event to a named queue, one
//! per reconciler. A queue owns the worker pool for its reconciler and is
//! responsible for retries; the bus never retries.
//!
//! - [`MemoryWorkQueue`]: in-process, semaphore-bounded pools
//! - [`RedisWorkQueue`]: durable, at-least-once, shared across processes

mod redis_queue;

pub use redis_queue::RedisWorkQueue;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::registry::{Reconciler, WorkerOptions};
use crate::shutdown::ShutdownController;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Named, per-reconciler job queues with worker pools
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Create the queue for `name` and start its workers
    async fn register(
        &self,
        name: &str,
        reconciler: Arc<dyn Reconciler>,
        options: WorkerOptions,
    ) -> Result<()>;

    /// Hand an event to the queue for `name`
    async fn enqueue(&self, name: &str, event: Event) -> Result<()>;

    /// Stop pulling jobs and wait for in-flight ones
    async fn shutdown(&self);
}

struct Job {
    event: Event,
    attempt: u32,
}

/// In-process work queue.
///
/// Each registered reconciler gets an unbounded channel and a pool runner
/// that admits at most `workers` concurrent jobs.
pub struct MemoryWorkQueue {
    queues: RwLock<HashMap<String, mpsc::UnboundedSender<Job>>>,
    runners: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<ShutdownController>,
}

impl MemoryWorkQueue {
    /// Create a queue with the default drain timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_shutdown(ShutdownController::new())
    }

    /// Create a queue that drains under the given controller
    #[must_use]
    pub fn with_shutdown(shutdown: Arc<ShutdownController>) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            runners: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Number of jobs currently being processed across all pools
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.shutdown.active_task_count()
    }
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn register(
        &self,
        name: &str,
        reconciler: Arc<dyn Reconciler>,
        options: WorkerOptions,
    ) -> Result<()> {
        let mut queues = self.queues.write().await;
        if queues.contains_key(name) {
            return Err(Error::DuplicateReconciler(name.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(name.to_string(), tx.clone());

        let pool = WorkerPool {
            name: name.to_string(),
            reconciler,
            retries: options.retries,
            slots: Arc::new(Semaphore::new(options.workers.max(1))),
            retry_tx: tx,
            shutdown: Arc::clone(&self.shutdown),
        };
        let token = self.shutdown.token();
        self.runners
            .lock()
            .await
            .push(tokio::spawn(pool.run(rx, token)));

        info!(queue = %name, workers = options.workers, retries = options.retries, "Work queue registered");
        Ok(())
    }

    async fn enqueue(&self, name: &str, event: Event) -> Result<()> {
        let queues = self.queues.read().await;
        let tx = queues
            .get(name)
            .ok_or_else(|| Error::UnknownReconciler(name.to_string()))?;
        tx.send(Job { event, attempt: 0 })
            .map_err(|_| Error::Queue(format!("queue {} is closed", name)))
    }

    async fn shutdown(&self) {
        self.shutdown.shutdown().await;
        for runner in self.runners.lock().await.drain(..) {
            let _ = runner.await;
        }
    }
}

struct WorkerPool {
    name: String,
    reconciler: Arc<dyn Reconciler>,
    retries: u32,
    slots: Arc<Semaphore>,
    retry_tx: mpsc::UnboundedSender<Job>,
    shutdown: Arc<ShutdownController>,
}

impl WorkerPool {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>, token: CancellationToken) {
        let pool = Arc::new(self);
        loop {
            let job = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!(queue = %pool.name, event = %job.event.name(), "Shutdown before job started, dropping");
                    break;
                }
                permit = Arc::clone(&pool.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let guard = pool.shutdown.register_task();
            let worker = Arc::clone(&pool);
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                worker.execute(job).await;
            });
        }

        let abandoned = rx.len();
        if abandoned > 0 {
            warn!(queue = %pool.name, abandoned, "Work queue stopped with pending jobs");
        }
        debug!(queue = %pool.name, "Worker pool stopped");
    }

    async fn execute(&self, job: Job) {
        let name = job.event.name().to_string();
        match self.reconciler.process(job.event.clone()).await {
            Ok(()) => {
                debug!(queue = %self.name, event = %name, attempt = job.attempt, "Job completed");
            }
            Err(e) if job.attempt < self.retries => {
                warn!(queue = %self.name, event = %name, attempt = job.attempt, error = %e, "Job failed, retrying");
                let retry = Job {
                    event: job.event,
                    attempt: job.attempt + 1,
                };
                if self.retry_tx.send(retry).is_err() {
                    error!(queue = %self.name, event = %name, "Queue closed, retry lost");
                }
            }
            Err(e) => {
                error!(queue = %self.name, event = %name, attempts = job.attempt + 1, error = %e, "Job failed, giving up");
            }
        }
    }
}
