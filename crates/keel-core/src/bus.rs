//! EventBus - routes command and status events between reconcilers.
//!
//! Producers publish onto a bounded in-memory queue. A single dispatch loop
//! pulls each event, mirrors it to broadcast observers (API, UI and
//! notification layers), and hands it to every enabled reconciler whose
//! subscriptions contain the event name or payload kind, either inline or
//! through a [`WorkQueue`]. Statuses published by reconcilers come back in
//! on a separate report lane that the loop drains ahead of producers.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::queue::{MemoryWorkQueue, WorkQueue};
use crate::registry::{PluginRegistry, Reconciler};
use crate::shutdown::ShutdownController;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How matched events reach reconcilers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Call `process` directly from the dispatch loop (tests, single process)
    Inline,
    /// Hand events to the work queue (production)
    #[default]
    Queued,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of the shared publish queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Buffered events per observer before it lags
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,
    /// Dispatch mode
    #[serde(default)]
    pub mode: DispatchMode,
    /// Leave work-queue shutdown to its own runner
    #[serde(default)]
    pub delegate_shutdown: bool,
    /// Upper bound on waiting for in-flight work at shutdown, in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_observer_capacity() -> usize {
    1024
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            observer_capacity: default_observer_capacity(),
            mode: DispatchMode::default(),
            delegate_shutdown: false,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl BusConfig {
    /// Inline dispatch, used by tests and single-process setups
    #[must_use]
    pub fn inline() -> Self {
        Self {
            mode: DispatchMode::Inline,
            ..Self::default()
        }
    }

    /// Set the publish queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[derive(Debug, Clone)]
enum Lane {
    Producer(mpsc::Sender<Event>),
    Reports(mpsc::UnboundedSender<Event>),
}

/// Cloneable publishing handle onto the bus.
///
/// Producers get a handle on the bounded producer queue. Reconcilers get
/// one on the report lane in `start`: the dispatch loop drains that lane
/// first and it never waits for capacity, so a reconciler running inline
/// can always publish its statuses.
#[derive(Debug, Clone)]
pub struct EventSink {
    lane: Lane,
}

impl EventSink {
    /// Publish, waiting for queue capacity if the bus is saturated
    pub async fn publish(&self, event: Event) -> Result<()> {
        match &self.lane {
            Lane::Producer(tx) => tx.send(event).await.map_err(|_| Error::BusClosed),
            Lane::Reports(tx) => tx.send(event).map_err(|_| Error::BusClosed),
        }
    }

    /// Publish without waiting; fails with `BusFull` at capacity
    pub fn try_publish(&self, event: Event) -> Result<()> {
        match &self.lane {
            Lane::Producer(tx) => tx.try_send(event).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::BusFull,
                mpsc::error::TrySendError::Closed(_) => Error::BusClosed,
            }),
            Lane::Reports(tx) => tx.send(event).map_err(|_| Error::BusClosed),
        }
    }

    /// Free slots in the publish queue; unbounded for the report lane
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.lane {
            Lane::Producer(tx) => tx.capacity(),
            Lane::Reports(_) => usize::MAX,
        }
    }
}

struct Subscriber {
    name: String,
    subscriptions: HashSet<String>,
    reconciler: Arc<dyn Reconciler>,
}

impl Subscriber {
    fn wants(&self, event: &Event) -> bool {
        self.subscriptions.iter().any(|s| event.matches(s))
    }
}

struct Dispatcher {
    mode: DispatchMode,
    subscribers: Vec<Subscriber>,
    work_queue: Arc<dyn WorkQueue>,
    observers: broadcast::Sender<Event>,
    shutdown: Arc<ShutdownController>,
}

impl Dispatcher {
    async fn run(
        self,
        mut rx: mpsc::Receiver<Event>,
        mut reports: mpsc::UnboundedReceiver<Event>,
        token: CancellationToken,
    ) {
        info!(mode = ?self.mode, reconcilers = self.subscribers.len(), "Dispatch loop started");
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(event) = reports.recv() => event,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.dispatch(event).await;
        }
        info!(pending = rx.len(), reports = reports.len(), "Dispatch loop stopped");
    }

    async fn dispatch(&self, event: Event) {
        let observed = self.observers.send(event.clone()).unwrap_or(0);

        let targets: Vec<&Subscriber> = self.subscribers.iter().filter(|s| s.wants(&event)).collect();
        if targets.is_empty() {
            if observed == 0 {
                warn!(event = %event.name(), id = %event.id(), "No reconciler or observer for event");
            } else {
                debug!(event = %event.name(), id = %event.id(), observers = observed, "Event delivered to observers only");
            }
            return;
        }

        for target in targets {
            match self.mode {
                DispatchMode::Inline => {
                    let _guard = self.shutdown.register_task();
                    debug!(reconciler = %target.name, event = %event.name(), "Dispatching inline");
                    if let Err(e) = target.reconciler.process(event.clone()).await {
                        error!(reconciler = %target.name, event = %event.name(), id = %event.id(), error = %e, "Reconciler failed to process event");
                    }
                }
                DispatchMode::Queued => {
                    debug!(reconciler = %target.name, event = %event.name(), "Enqueueing");
                    if let Err(e) = self.work_queue.enqueue(&target.name, event.clone()).await {
                        error!(reconciler = %target.name, event = %event.name(), id = %event.id(), error = %e, "Failed to enqueue event");
                    }
                }
            }
        }
    }
}

/// The command bus
pub struct EventBus {
    config: BusConfig,
    registry: PluginRegistry,
    sink: EventSink,
    reports: EventSink,
    rx: Mutex<Option<(mpsc::Receiver<Event>, mpsc::UnboundedReceiver<Event>)>>,
    observers: broadcast::Sender<Event>,
    work_queue: Arc<dyn WorkQueue>,
    shutdown: Arc<ShutdownController>,
    started: RwLock<Vec<(String, Arc<dyn Reconciler>)>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus over a registry, with an in-memory work queue
    #[must_use]
    pub fn new(registry: PluginRegistry, config: BusConfig) -> Self {
        let drain = Duration::from_secs(config.drain_timeout_secs);
        let work_queue: Arc<dyn WorkQueue> = Arc::new(MemoryWorkQueue::with_shutdown(
            ShutdownController::with_timeout(drain),
        ));
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(config.observer_capacity.max(1));
        Self {
            registry,
            sink: EventSink {
                lane: Lane::Producer(tx),
            },
            reports: EventSink {
                lane: Lane::Reports(reports_tx),
            },
            rx: Mutex::new(Some((rx, reports_rx))),
            observers,
            work_queue,
            shutdown: ShutdownController::with_timeout(drain),
            started: RwLock::new(Vec::new()),
            dispatch_handle: Mutex::new(None),
            config,
        }
    }

    /// Use a different work queue backend for queued mode
    #[must_use]
    pub fn with_work_queue(mut self, work_queue: Arc<dyn WorkQueue>) -> Self {
        self.work_queue = work_queue;
        self
    }

    /// Publishing handle
    #[must_use]
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Publish an event, waiting for capacity when saturated
    pub async fn publish(&self, event: Event) -> Result<()> {
        self.sink.publish(event).await
    }

    /// Observe every event the dispatch loop handles, status events included.
    /// Observers that fall behind lose events instead of blocking dispatch.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }

    /// Dispatch mode in use
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.config.mode
    }

    /// Names of started reconcilers
    pub async fn reconcilers(&self) -> Vec<String> {
        self.started
            .read()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether any started reconciler subscribes to the event
    pub async fn is_routed(&self, event: &Event) -> bool {
        self.started
            .read()
            .await
            .iter()
            .any(|(_, reconciler)| reconciler.subscriptions().iter().any(|s| event.matches(s)))
    }

    /// Instantiate and start every enabled reconciler, then run the
    /// dispatch loop in the background. Any start failure is fatal.
    pub async fn start(&self) -> Result<()> {
        let (rx, reports) = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::configuration("bus", "event bus already started"))?;

        let mut subscribers = Vec::new();
        let mut started = self.started.write().await;
        for instance in self.registry.instantiate() {
            instance
                .reconciler
                .start(self.reports.clone())
                .await
                .map_err(|e| match e {
                    Error::Configuration { .. } => e,
                    other => Error::configuration(&instance.name, other.to_string()),
                })?;

            if self.config.mode == DispatchMode::Queued {
                self.work_queue
                    .register(&instance.name, Arc::clone(&instance.reconciler), instance.options)
                    .await?;
            }

            let subscriptions = instance.reconciler.subscriptions();
            info!(reconciler = %instance.name, subscriptions = ?subscriptions, "Reconciler started");
            started.push((instance.name.clone(), Arc::clone(&instance.reconciler)));
            subscribers.push(Subscriber {
                name: instance.name,
                subscriptions,
                reconciler: instance.reconciler,
            });
        }
        drop(started);

        let dispatcher = Dispatcher {
            mode: self.config.mode,
            subscribers,
            work_queue: Arc::clone(&self.work_queue),
            observers: self.observers.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };
        let handle = tokio::spawn(dispatcher.run(rx, reports, self.shutdown.token()));
        *self.dispatch_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop pulling events, let dispatched work finish (bounded), then
    /// stop every reconciler. With `delegate_shutdown` the work queue is
    /// left to its own runner.
    pub async fn shutdown(&self) {
        info!("Event bus shutting down");
        self.shutdown.shutdown().await;

        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            let drain = Duration::from_secs(self.config.drain_timeout_secs);
            if tokio::time::timeout(drain, handle).await.is_err() {
                warn!("Dispatch loop did not stop within the drain timeout");
            }
        }

        if self.config.delegate_shutdown {
            info!("Work queue shutdown delegated to its runner");
        } else {
            self.work_queue.shutdown().await;
        }

        for (name, reconciler) in self.started.read().await.iter() {
            debug!(reconciler = %name, "Stopping reconciler");
            reconciler.stop().await;
        }
        info!("Event bus stopped");
    }
}
