use super::*;
use crate::config::RegistryConfig;
use keel_cluster::{ClusterError, Convergence, MemoryCluster, MockClusterApi, IMAGE_PULL_BACK_OFF};
use keel_core::{BusConfig, EventBus, ExposePayload, ExposeType, PluginRegistry, Protocol, SecretEntry, SecretKind};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    bus: EventBus,
    observer: broadcast::Receiver<Event>,
    reconciler: Arc<DeploymentReconciler>,
}

async fn harness(cluster: Arc<dyn ClusterApi>, config: KubernetesConfig) -> Harness {
    let bus = EventBus::new(PluginRegistry::new(), BusConfig::inline());
    let observer = bus.subscribe();
    bus.start().await.unwrap();

    let reconciler = Arc::new(DeploymentReconciler::new(cluster, config));
    reconciler.start(bus.sink()).await.unwrap();
    Harness {
        bus,
        observer,
        reconciler,
    }
}

impl Harness {
    /// Status events emitted for the command, up to and including the
    /// terminal one
    async fn statuses(&mut self) -> Vec<DeployPayload> {
        let mut out = Vec::new();
        loop {
            let event = self.observer.recv().await.unwrap();
            if let Payload::Deploy(p) = event.payload() {
                if p.action == Action::Status {
                    let terminal = p.state.is_terminal();
                    out.push(p.clone());
                    if terminal {
                        return out;
                    }
                }
            }
        }
    }

    async fn run(&mut self, deploy: DeployPayload) -> Vec<DeployPayload> {
        self.reconciler.process(Event::new(deploy)).await.unwrap();
        self.statuses().await
    }
}

fn shop(action: Action) -> DeployPayload {
    DeployPayload::new(action, "shop", "dev", "registry/shop:abc123")
        .with_service(Service::new("web").with_listener(8080, Protocol::Http))
        .with_service(Service::new("worker"))
}

fn states(statuses: &[DeployPayload]) -> Vec<State> {
    statuses.iter().map(|s| s.state).collect()
}

// ============================================================================
// Rollouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_reports_running_then_complete() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;

    let statuses = h.run(shop(Action::Create)).await;

    assert_eq!(states(&statuses), vec![State::Running, State::Complete]);
    let done = &statuses[1];
    assert!(done.services.iter().all(|s| s.state == State::Complete));
    assert!(cluster.has_namespace("dev-shop"));
    assert_eq!(cluster.workload_names("dev-shop"), vec!["shop-web", "shop-worker"]);

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_rollout_polls_until_converged() {
    let cluster = Arc::new(MemoryCluster::new().with_rollout(Convergence::AfterChecks(3)));
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;

    let started = Instant::now();
    let statuses = h.run(shop(Action::Create)).await;

    assert_eq!(states(&statuses), vec![State::Running, State::Complete]);
    // Checks at 0s, 5s and 10s
    assert_eq!(started.elapsed(), Duration::from_secs(10));

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stuck_rollout_times_out() {
    let cluster = Arc::new(MemoryCluster::new().with_rollout(Convergence::Never));
    let mut h = harness(cluster, KubernetesConfig::default()).await;

    let started = Instant::now();
    let statuses = h.run(shop(Action::Create).with_timeout(30)).await;

    assert_eq!(states(&statuses), vec![State::Running, State::Failed]);
    let failed = &statuses[1];
    assert!(failed.state_message.contains("timed out"), "{}", failed.state_message);
    assert!(failed.state_message.contains("web"));
    assert!(failed.services.iter().all(|s| s.state == State::Waiting));
    assert_eq!(started.elapsed(), Duration::from_secs(30));

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unpullable_image_fails_without_waiting_out_budget() {
    let cluster = Arc::new(MemoryCluster::new().with_unresolvable_image("registry/shop:abc123"));
    let mut h = harness(cluster, KubernetesConfig::default()).await;

    let started = Instant::now();
    let statuses = h.run(shop(Action::Create)).await;

    let failed = statuses.last().unwrap();
    assert_eq!(failed.state, State::Failed);
    assert!(failed.state_message.starts_with("2 of 2 services failed"));
    assert!(failed
        .services
        .iter()
        .all(|s| s.state_message.contains(IMAGE_PULL_BACK_OFF)));
    assert!(started.elapsed() < Duration::from_secs(60));

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_reuses_existing_workload() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;
    h.run(shop(Action::Create)).await;

    let mut update = shop(Action::Update);
    update.image = "registry/shop:def456".to_string();
    let statuses = h.run(update).await;

    assert_eq!(statuses.last().unwrap().state, State::Complete);
    let web = cluster.workload("dev-shop", "shop-web").unwrap();
    assert_eq!(web.meta.generation, 2);
    assert_eq!(web.spec.template.containers[0].image, "registry/shop:def456");

    h.bus.shutdown().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_destroy_scales_to_zero() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;
    h.run(shop(Action::Create)).await;

    let statuses = h.run(shop(Action::Destroy)).await;

    assert_eq!(statuses.last().unwrap().state, State::Complete);
    assert_eq!(cluster.workload("dev-shop", "shop-web").unwrap().spec.replicas, 0);
    assert!(cluster.pod_names("dev-shop").is_empty());

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_destroy_of_missing_workload_is_complete() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;

    let statuses = h.run(shop(Action::Destroy)).await;

    let done = statuses.last().unwrap();
    assert_eq!(done.state, State::Complete);
    assert!(done.services.iter().all(|s| s.state_message == "already removed"));
    assert!(cluster.workload_names("dev-shop").is_empty());

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_service_is_cleaned_up() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;
    h.run(shop(Action::Create)).await;
    assert!(cluster.pod_names("dev-shop").iter().any(|p| p.starts_with("shop-worker")));

    let web_only = DeployPayload::new(Action::Update, "shop", "dev", "registry/shop:abc123")
        .with_service(Service::new("web").with_listener(8080, Protocol::Http));
    let statuses = h.run(web_only).await;

    assert_eq!(statuses.last().unwrap().state, State::Complete);
    assert_eq!(cluster.workload_names("dev-shop"), vec!["shop-web"]);
    assert!(cluster
        .replica_set_names("dev-shop")
        .iter()
        .all(|rs| !rs.starts_with("shop-worker")));
    assert!(cluster
        .pod_names("dev-shop")
        .iter()
        .all(|p| !p.starts_with("shop-worker")));

    h.bus.shutdown().await;
}

// ============================================================================
// Secrets and placement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_secrets_are_bundled_and_never_echoed() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut h = harness(cluster.clone(), KubernetesConfig::default()).await;

    let deploy = shop(Action::Create)
        .with_secret(SecretEntry::new("DATABASE_URL", "postgres://db", SecretKind::Env))
        .with_secret(SecretEntry::new("tls.key", "-----BEGIN", SecretKind::File));
    let statuses = h.run(deploy).await;

    assert!(statuses.iter().all(|s| s.secrets.is_empty()));
    let secrets = cluster.secret_names("dev-shop");
    assert_eq!(secrets.len(), 1);
    assert!(secrets[0].starts_with("shop-"));

    let web = cluster.workload("dev-shop", "shop-web").unwrap();
    let container = &web.spec.template.containers[0];
    assert_eq!(container.env[0].name, "DATABASE_URL");
    assert_eq!(container.env[0].secret_name, secrets[0]);
    assert_eq!(container.volume_mounts[0].mount_path, manifest::SECRETS_MOUNT_PATH);

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registry_and_node_selector_applied() {
    let cluster = Arc::new(MemoryCluster::new());
    let mut config = KubernetesConfig {
        registry: Some(RegistryConfig {
            host: "registry.example.com".to_string(),
            username: "deploy".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    config
        .node_selector
        .insert("pool".to_string(), "apps".to_string());
    let mut h = harness(cluster.clone(), config).await;

    h.run(shop(Action::Create)).await;

    assert!(cluster.secret("dev-shop", "keel-registry").is_some());
    let template = cluster.workload("dev-shop", "shop-web").unwrap().spec.template;
    assert_eq!(template.image_pull_secrets, vec!["keel-registry"]);
    assert_eq!(template.node_selector.get("pool").unwrap(), "apps");

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_environment_override_picks_namespace() {
    let cluster = Arc::new(MemoryCluster::new());
    let config = KubernetesConfig {
        environment: Some("prod".to_string()),
        ..Default::default()
    };
    let mut h = harness(cluster.clone(), config).await;

    h.run(shop(Action::Create)).await;

    assert!(cluster.has_namespace("prod-shop"));
    assert!(!cluster.has_namespace("dev-shop"));

    h.bus.shutdown().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_update_fails_service() {
    let mut cluster = MockClusterApi::new();
    cluster.expect_check().returning(|| Ok(()));
    cluster
        .expect_get_namespace()
        .returning(|name| Ok(manifest::namespace(name)));
    cluster.expect_get_workload().returning(|ns, name| {
        let mut existing = Workload::default();
        existing.meta = keel_cluster::ObjectMeta::new(ns, name);
        existing.meta.resource_version = "7".to_string();
        Ok(existing)
    });
    cluster
        .expect_update_workload()
        .returning(|w| Err(ClusterError::conflict("workload", w.meta.name, "resource version is stale")));
    let mut h = harness(Arc::new(cluster), KubernetesConfig::default()).await;

    let deploy = DeployPayload::new(Action::Update, "shop", "dev", "img")
        .with_service(Service::new("web"));
    let statuses = h.run(deploy).await;

    assert_eq!(states(&statuses), vec![State::Running, State::Failed]);
    let failed = &statuses[1];
    assert!(failed.state_message.starts_with("1 of 1 services failed"));
    assert!(failed.services[0].state_message.contains("conflict"));

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_rejected_upsert_ends_the_pass_at_once() {
    let mut cluster = MockClusterApi::new();
    cluster.expect_check().returning(|| Ok(()));
    cluster
        .expect_get_namespace()
        .returning(|name| Ok(manifest::namespace(name)));
    cluster.expect_get_workload().returning(|ns, name| {
        if name != "shop-web" {
            return Err(ClusterError::not_found("workload", name));
        }
        let mut existing = Workload::default();
        existing.meta = keel_cluster::ObjectMeta::new(ns, name);
        existing.meta.resource_version = "3".to_string();
        Ok(existing)
    });
    cluster
        .expect_update_workload()
        .returning(|w| Err(ClusterError::conflict("workload", w.meta.name, "resource version is stale")));
    cluster.expect_create_workload().times(1).returning(Ok);
    let mut h = harness(Arc::new(cluster), KubernetesConfig::default()).await;

    let deploy = DeployPayload::new(Action::Update, "shop", "dev", "img")
        .with_service(Service::new("web"))
        .with_service(Service::new("worker"));
    let started = Instant::now();
    let statuses = h.run(deploy).await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(states(&statuses), vec![State::Running, State::Failed]);
    let failed = &statuses[1];
    assert_eq!(failed.state_message, "1 of 2 services failed: web");
    assert_eq!(failed.services[0].name, "web");
    assert_eq!(failed.services[0].state, State::Failed);
    assert_eq!(failed.services[1].name, "worker");
    assert_eq!(failed.services[1].state, State::Waiting);

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_preparation_failure_still_reports_running_first() {
    let mut cluster = MockClusterApi::new();
    cluster.expect_check().returning(|| Ok(()));
    cluster
        .expect_get_namespace()
        .returning(|_| Err(ClusterError::Unavailable("connection refused".to_string())));
    cluster.expect_create_workload().never();
    let mut h = harness(Arc::new(cluster), KubernetesConfig::default()).await;

    let statuses = h.run(shop(Action::Create)).await;

    assert_eq!(states(&statuses), vec![State::Running, State::Failed]);
    assert!(statuses[1].state_message.contains("connection refused"));
    assert!(statuses[1].state_message.contains("cluster error"));
    assert!(!statuses[1].state_message.contains("configuration"));
    assert!(statuses[1].services.iter().all(|s| s.state == State::Failed));

    h.bus.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_polling() {
    let cluster = Arc::new(MemoryCluster::new().with_rollout(Convergence::Never));
    let mut h = harness(cluster, KubernetesConfig::default()).await;

    let reconciler = h.reconciler.clone();
    let pass = tokio::spawn(async move { reconciler.process(Event::new(shop(Action::Create))).await });
    tokio::time::sleep(Duration::from_secs(7)).await;
    h.reconciler.stop().await;
    pass.await.unwrap().unwrap();

    let statuses = h.statuses().await;
    assert_eq!(states(&statuses), vec![State::Running, State::Failed]);
    assert_eq!(statuses[1].state_message, ReconcileError::Cancelled.to_string());

    h.bus.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_cluster_fails_start() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_reachable(false);
    let bus = EventBus::new(PluginRegistry::new(), BusConfig::inline());

    let reconciler = DeploymentReconciler::new(cluster, KubernetesConfig::default());
    let err = reconciler.start(bus.sink()).await.unwrap_err();
    assert!(err.is_fatal());
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_subscriptions() {
    let reconciler = DeploymentReconciler::new(Arc::new(MemoryCluster::new()), KubernetesConfig::default());
    let subs = reconciler.subscriptions();
    assert_eq!(subs.len(), 3);
    assert!(subs.contains("Deploy:create"));
    assert!(subs.contains("Deploy:update"));
    assert!(subs.contains("Deploy:destroy"));
}

#[tokio::test]
async fn test_status_events_ignored_and_foreign_payload_rejected() {
    let cluster = Arc::new(MemoryCluster::new());
    let h = harness(cluster.clone(), KubernetesConfig::default()).await;

    let status = shop(Action::Create).status(State::Running, "");
    h.reconciler.process(Event::new(status)).await.unwrap();
    assert!(!cluster.has_namespace("dev-shop"));

    let expose = ExposePayload::new(Action::Create, ExposeType::Internal, "web", "shop", "web", "dev");
    let err = h.reconciler.process(Event::new(expose)).await.unwrap_err();
    assert!(!err.is_fatal());

    h.bus.shutdown().await;
}

#[test]
fn test_rollout_complete_requires_observed_generation() {
    let mut workload = Workload::default();
    workload.meta.generation = 2;
    workload.spec.replicas = 2;
    workload.status.observed_generation = 1;
    workload.status.updated_replicas = 2;
    workload.status.available_replicas = 2;
    assert!(!rollout_complete(&workload));

    workload.status.observed_generation = 2;
    assert!(rollout_complete(&workload));

    workload.status.unavailable_replicas = 1;
    assert!(!rollout_complete(&workload));
}
