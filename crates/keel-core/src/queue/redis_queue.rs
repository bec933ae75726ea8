use super::WorkQueue;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::registry::{Reconciler, WorkerOptions};
use crate::shutdown::ShutdownController;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a worker idles on an empty queue
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Back-off after a connection error
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    attempt: u32,
    event: Event,
}

/// Redis-backed durable work queue (for production)
///
/// Jobs live in `<prefix>queue:<name>`. A worker atomically moves a job
/// into its consumer's processing list with `LMOVE`, processes it, then
/// removes it. A job is only lost once it succeeded or exhausted its
/// retries, so delivery is at-least-once. Jobs stranded in the processing
/// list by a crashed consumer are requeued when that consumer registers
/// again under the same consumer id.
pub struct RedisWorkQueue {
    client: redis::Client,
    prefix: String,
    consumer: String,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<ShutdownController>,
}

impl RedisWorkQueue {
    /// Create a new Redis work queue
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: "keel:".to_string(),
            consumer: "default".to_string(),
            workers: Mutex::new(Vec::new()),
            shutdown: ShutdownController::new(),
        })
    }

    /// Use a custom key prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Use a stable consumer id (e.g. the hostname) for crash recovery
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Use a custom shutdown controller
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn queue_key(&self, name: &str) -> String {
        format!("{}queue:{}", self.prefix, name)
    }

    fn processing_key(&self, name: &str) -> String {
        format!("{}processing:{}:{}", self.prefix, name, self.consumer)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Move jobs left in this consumer's processing list back to the queue
    async fn recover(&self, name: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(self.processing_key(name))
                .arg(self.queue_key(name))
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Number of jobs waiting in the queue for `name`
    pub async fn pending(&self, name: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(self.queue_key(name))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn register(
        &self,
        name: &str,
        reconciler: Arc<dyn Reconciler>,
        options: WorkerOptions,
    ) -> Result<()> {
        let recovered = self.recover(name).await?;
        if recovered > 0 {
            warn!(queue = %name, recovered, "Requeued jobs from a previous run");
        }

        let mut workers = self.workers.lock().await;
        for index in 0..options.workers.max(1) {
            let worker = RedisWorker {
                client: self.client.clone(),
                name: name.to_string(),
                queue_key: self.queue_key(name),
                processing_key: self.processing_key(name),
                retries: options.retries,
                reconciler: Arc::clone(&reconciler),
                shutdown: Arc::clone(&self.shutdown),
            };
            workers.push(tokio::spawn(worker.run(index, self.shutdown.token())));
        }

        info!(queue = %name, workers = options.workers, retries = options.retries, consumer = %self.consumer, "Redis work queue registered");
        Ok(())
    }

    async fn enqueue(&self, name: &str, event: Event) -> Result<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(&Envelope { attempt: 0, event })?;
        redis::cmd("LPUSH")
            .arg(self.queue_key(name))
            .arg(&json)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown.shutdown().await;
        for worker in self.workers.lock().await.drain(..) {
            let _ = worker.await;
        }
    }
}

struct RedisWorker {
    client: redis::Client,
    name: String,
    queue_key: String,
    processing_key: String,
    retries: u32,
    reconciler: Arc<dyn Reconciler>,
    shutdown: Arc<ShutdownController>,
}

impl RedisWorker {
    async fn run(self, index: usize, token: CancellationToken) {
        debug!(queue = %self.name, worker = index, "Redis worker started");
        let mut conn = None;

        while !token.is_cancelled() {
            let mut active = match conn.take() {
                Some(c) => c,
                None => match self.client.get_multiplexed_async_connection().await {
                    Ok(c) => c,
                    Err(e) => {
                        error!(queue = %self.name, error = %e, "Redis connection failed");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            match self.next_job(&mut active).await {
                Ok(Some(raw)) => {
                    let _guard = self.shutdown.register_task();
                    if let Err(e) = self.handle(&mut active, &raw).await {
                        error!(queue = %self.name, error = %e, "Failed to settle job");
                    }
                    conn = Some(active);
                }
                Ok(None) => {
                    conn = Some(active);
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(e) => {
                    error!(queue = %self.name, error = %e, "Redis dequeue failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        debug!(queue = %self.name, worker = index, "Redis worker stopped");
    }

    async fn next_job(&self, conn: &mut redis::aio::MultiplexedConnection) -> Result<Option<String>> {
        let raw: Option<String> = redis::cmd("LMOVE")
            .arg(&self.queue_key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(conn)
            .await?;
        Ok(raw)
    }

    async fn handle(&self, conn: &mut redis::aio::MultiplexedConnection, raw: &str) -> Result<()> {
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => {
                let event_name = envelope.event.name().to_string();
                match self.reconciler.process(envelope.event.clone()).await {
                    Ok(()) => {
                        debug!(queue = %self.name, event = %event_name, "Job completed");
                    }
                    Err(e) if envelope.attempt < self.retries => {
                        warn!(queue = %self.name, event = %event_name, attempt = envelope.attempt, error = %e, "Job failed, retrying");
                        let retry = serde_json::to_string(&Envelope {
                            attempt: envelope.attempt + 1,
                            event: envelope.event,
                        })?;
                        redis::cmd("LPUSH")
                            .arg(&self.queue_key)
                            .arg(&retry)
                            .query_async::<()>(conn)
                            .await?;
                    }
                    Err(e) => {
                        error!(queue = %self.name, event = %event_name, attempts = envelope.attempt + 1, error = %e, "Job failed, giving up");
                    }
                }
            }
            Err(e) => {
                error!(queue = %self.name, error = %e, "Dropping undecodable job");
            }
        }

        redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(raw)
            .query_async::<()>(conn)
            .await
            .map_err(Error::from)
    }
}
