//! Serve loop
//!
//! Wires the registry, bus and reconcilers, then bridges JSON lines:
//! commands in on stdin, status events out on stdout.

use super::config::{AppConfig, QueueBackend};
use super::loader::load_config;
use super::validation::validate_config;
use anyhow::{Context, Result};
use keel_cluster::{ClusterApi, KubeCluster, MemoryCluster};
use keel_core::{
    wait_for_shutdown_signal, Action, DispatchMode, Event, EventBus, PluginRegistry,
    RedisWorkQueue,
};
use keel_reconcile::ClusterBackend;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Commands published but not yet answered with a terminal status
#[derive(Default)]
struct Outstanding {
    ids: Mutex<HashSet<Uuid>>,
    settled: Notify,
}

impl Outstanding {
    fn track(&self, id: Uuid) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
    }

    fn settle(&self, id: Uuid) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if ids.remove(&id) && ids.is_empty() {
            self.settled.notify_waiters();
        }
    }

    fn is_empty(&self) -> bool {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    async fn drained(&self) {
        loop {
            let settled = self.settled.notified();
            if self.is_empty() {
                return;
            }
            settled.await;
        }
    }
}

async fn build_cluster(config: &AppConfig) -> Result<Arc<dyn ClusterApi>> {
    match config.kubernetes.backend {
        ClusterBackend::Memory => {
            info!("Using in-memory cluster backend");
            Ok(Arc::new(MemoryCluster::new()))
        }
        ClusterBackend::Kubernetes => {
            let kubernetes = &config.kubernetes;
            let cluster = KubeCluster::connect(&kubernetes.api_endpoint, &kubernetes.token)
                .await
                .map_err(|e| keel_core::Error::configuration("kubernetes", e.to_string()))?;
            info!("Using Kubernetes cluster backend");
            Ok(Arc::new(cluster))
        }
    }
}

/// Build the bus with both reconcilers registered
pub async fn build_bus(config: &AppConfig) -> Result<EventBus> {
    let cluster = build_cluster(config).await?;
    let mut registry = PluginRegistry::new();
    keel_reconcile::register(&mut registry, cluster, &config.kubernetes, &config.reconcilers)
        .context("Failed to register reconcilers")?;
    info!(reconcilers = ?registry.names(), "Reconcilers registered");

    let bus = EventBus::new(registry, config.bus.dispatch.clone());
    if config.bus.dispatch.mode == DispatchMode::Queued
        && config.bus.queue_backend == QueueBackend::Redis
    {
        let queue = RedisWorkQueue::new(&config.bus.redis_url)
            .context("Failed to create Redis work queue")?;
        info!(url = %config.bus.redis_url, "Using Redis work queue");
        return Ok(bus.with_work_queue(Arc::new(queue)));
    }
    Ok(bus)
}

/// Write status events to stdout and settle the commands they answer
async fn forward_statuses(mut observer: broadcast::Receiver<Event>, outstanding: Arc<Outstanding>) {
    loop {
        match observer.recv().await {
            Ok(event) => {
                if event.payload().action() != Some(Action::Status) {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(event = %event.name(), error = %e, "Failed to encode status"),
                }
                if event.payload().state().is_terminal() {
                    if let Some(parent) = event.parent_id() {
                        outstanding.settle(parent);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Status output lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Publish one event, tracking it when a reconciler will answer it
async fn submit(bus: &EventBus, outstanding: &Outstanding, event: Event) {
    let id = event.id();
    let command = event.payload().action() != Some(Action::Status);
    let routed = bus.is_routed(&event).await;
    if command && routed {
        outstanding.track(id);
    } else if command {
        warn!(event = %event.name(), id = %id, "No enabled reconciler handles command, not waiting for it");
    }

    debug!(event = %event.name(), id = %id, "Publishing command");
    if let Err(e) = bus.publish(event).await {
        outstanding.settle(id);
        warn!(id = %id, error = %e, "Publish failed");
    }
}

/// Publish every command line from stdin
async fn read_commands(bus: &EventBus, outstanding: &Outstanding) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed command");
                continue;
            }
        };

        submit(bus, outstanding, event).await;
    }
    Ok(())
}

/// Run the serve loop until a signal, or until stdin ends and every
/// command has a terminal status
pub async fn run(inline: bool, explicit: Option<&Path>) -> Result<()> {
    info!("Starting keel v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(explicit).context("Failed to load configuration")?;
    if inline {
        config.bus.dispatch.mode = DispatchMode::Inline;
    }
    validate_config(&config)?;
    info!(mode = ?config.bus.dispatch.mode, "Configuration loaded");

    let bus = build_bus(&config).await?;
    let outstanding = Arc::new(Outstanding::default());
    let printer = tokio::spawn(forward_statuses(bus.subscribe(), outstanding.clone()));

    bus.start().await.context("Failed to start event bus")?;
    info!(reconcilers = ?bus.reconcilers().await, "Event bus started");

    tokio::select! {
        result = async {
            read_commands(&bus, &outstanding).await?;
            info!("End of input, waiting for outstanding commands");
            outstanding.drained().await;
            Ok::<_, anyhow::Error>(())
        } => result?,
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    bus.shutdown().await;
    printer.abort();
    info!("keel stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{DeployPayload, ExposePayload, ExposeType, WorkerOptions};
    use keel_reconcile::LoadBalancerReconciler;
    use std::time::Duration;

    #[tokio::test]
    async fn test_outstanding_drains_when_all_settled() {
        let outstanding = Outstanding::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        outstanding.track(a);
        outstanding.track(b);

        outstanding.settle(a);
        assert!(!outstanding.is_empty());
        outstanding.settle(b);
        outstanding.drained().await;
        assert!(outstanding.is_empty());
    }

    #[tokio::test]
    async fn test_build_bus_from_defaults() {
        let bus = build_bus(&AppConfig::default()).await.unwrap();
        assert_eq!(bus.mode(), DispatchMode::Queued);
    }

    #[tokio::test]
    async fn test_malformed_kubernetes_endpoint_is_a_configuration_error() {
        let mut config = AppConfig::default();
        config.kubernetes.backend = ClusterBackend::Kubernetes;
        config.kubernetes.api_endpoint = "not a url".to_string();

        let err = build_bus(&config).await.err().unwrap();
        let err = err.downcast::<keel_core::Error>().unwrap();
        assert!(err.is_fatal());
    }

    fn expose() -> Event {
        Event::new(ExposePayload::new(
            Action::Create,
            ExposeType::Internal,
            "shop-web",
            "shop",
            "web",
            "dev",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_command_is_not_waited_for() {
        let mut config = AppConfig::default();
        config.bus.dispatch.mode = DispatchMode::Inline;
        let mut disabled = WorkerOptions::default();
        disabled.enabled = false;
        config
            .reconcilers
            .insert(LoadBalancerReconciler::NAME.to_string(), disabled);

        let bus = build_bus(&config).await.unwrap();
        bus.start().await.unwrap();
        let outstanding = Outstanding::default();

        submit(&bus, &outstanding, expose()).await;
        assert!(outstanding.is_empty());
        tokio::time::timeout(Duration::from_secs(1), outstanding.drained())
            .await
            .unwrap();

        let deploy = Event::new(DeployPayload::new(Action::Create, "shop", "dev", "registry/shop:1"));
        submit(&bus, &outstanding, deploy).await;
        assert!(!outstanding.is_empty());

        bus.shutdown().await;
    }
}
