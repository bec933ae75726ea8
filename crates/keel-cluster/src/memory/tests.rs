use super::*;
use crate::resources::{Container, ObjectMeta, PodTemplate, ServiceSpec, WorkloadSpec};

fn workload(name: &str, image: &str, replicas: i32) -> Workload {
    let labels: LabelSelector = [("app".to_string(), name.to_string())].into_iter().collect();
    Workload {
        meta: ObjectMeta::new("dev-shop", name).with_label("app", name),
        spec: WorkloadSpec {
            replicas,
            selector: labels.clone(),
            template: PodTemplate {
                labels,
                containers: vec![Container {
                    name: name.to_string(),
                    image: image.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        },
        status: WorkloadStatus::default(),
    }
}

fn service(name: &str, kind: ServiceType) -> ClusterService {
    ClusterService {
        meta: ObjectMeta::new("dev-shop", name),
        spec: ServiceSpec {
            kind,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_namespace_create_once() {
    let cluster = MemoryCluster::new();
    let ns = Namespace {
        meta: ObjectMeta::new("", "dev-shop"),
    };
    cluster.create_namespace(ns.clone()).await.unwrap();
    assert!(cluster.has_namespace("dev-shop"));

    let err = cluster.create_namespace(ns).await.unwrap_err();
    assert!(matches!(err, ClusterError::AlreadyExists { .. }));
}

#[tokio::test]
async fn test_workload_create_rolls_pods() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_workload(workload("shop-web", "img:1", 2))
        .await
        .unwrap();

    assert_eq!(created.meta.generation, 1);
    assert!(!created.meta.resource_version.is_empty());
    assert_eq!(cluster.replica_set_names("dev-shop"), vec!["shop-web-1"]);
    assert_eq!(cluster.pod_names("dev-shop").len(), 2);

    let observed = cluster.get_workload("dev-shop", "shop-web").await.unwrap();
    assert_eq!(observed.status.observed_generation, 1);
    assert_eq!(observed.status.available_replicas, 2);
    assert_eq!(observed.status.unavailable_replicas, 0);
}

#[tokio::test]
async fn test_update_requires_current_version() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_workload(workload("shop-web", "img:1", 1))
        .await
        .unwrap();

    let mut stale = created.clone();
    stale.meta.resource_version = "0".to_string();
    let err = cluster.update_workload(stale).await.unwrap_err();
    assert!(err.is_conflict());

    let mut next = created;
    next.spec.template.containers[0].image = "img:2".to_string();
    let updated = cluster.update_workload(next).await.unwrap();
    assert_eq!(updated.meta.generation, 2);

    // The first rollout's replica set is kept at zero, its pods are gone
    let mut sets = cluster.replica_set_names("dev-shop");
    sets.sort();
    assert_eq!(sets, vec!["shop-web-1", "shop-web-2"]);
    assert_eq!(cluster.pod_names("dev-shop"), vec!["shop-web-2-0"]);
}

#[tokio::test]
async fn test_unchanged_update_keeps_generation() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_workload(workload("shop-web", "img:1", 1))
        .await
        .unwrap();
    let updated = cluster.update_workload(created.clone()).await.unwrap();
    assert_eq!(updated.meta.generation, 1);
    assert_ne!(updated.meta.resource_version, created.meta.resource_version);
}

#[tokio::test]
async fn test_slow_rollout_converges_after_checks() {
    let cluster = MemoryCluster::new().with_rollout(Convergence::AfterChecks(3));
    cluster
        .create_workload(workload("shop-web", "img:1", 1))
        .await
        .unwrap();

    for _ in 0..2 {
        let w = cluster.get_workload("dev-shop", "shop-web").await.unwrap();
        assert_eq!(w.status.unavailable_replicas, 1);
    }
    let w = cluster.get_workload("dev-shop", "shop-web").await.unwrap();
    assert_eq!(w.status.unavailable_replicas, 0);
}

#[tokio::test]
async fn test_unresolvable_image_backs_off() {
    let cluster = MemoryCluster::new().with_unresolvable_image("missing:latest");
    cluster
        .create_workload(workload("shop-web", "missing:latest", 1))
        .await
        .unwrap();

    let w = cluster.get_workload("dev-shop", "shop-web").await.unwrap();
    assert_eq!(w.status.available_replicas, 0);

    let pods = cluster
        .list_pods("dev-shop", &w.spec.selector)
        .await
        .unwrap();
    assert_eq!(pods[0].waiting_reason.as_deref(), Some(IMAGE_PULL_BACK_OFF));
}

#[tokio::test]
async fn test_zero_replicas_converge_even_with_bad_image() {
    let cluster = MemoryCluster::new().with_unresolvable_image("missing:latest");
    cluster
        .create_workload(workload("shop-web", "missing:latest", 0))
        .await
        .unwrap();
    let w = cluster.get_workload("dev-shop", "shop-web").await.unwrap();
    assert_eq!(w.status.unavailable_replicas, 0);
    assert!(cluster.pod_names("dev-shop").is_empty());
}

#[tokio::test]
async fn test_selector_must_match_template() {
    let cluster = MemoryCluster::new();
    let mut w = workload("shop-web", "img:1", 1);
    w.spec.template.labels.clear();
    assert!(matches!(
        cluster.create_workload(w).await,
        Err(ClusterError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_service_keeps_cluster_ip() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_service(service("shop-web", ServiceType::ClusterIp))
        .await
        .unwrap();
    let ip = created.spec.cluster_ip.clone();
    assert!(ip.is_some());

    let mut wiped = created.clone();
    wiped.spec.cluster_ip = None;
    assert!(matches!(
        cluster.update_service(wiped).await,
        Err(ClusterError::Invalid(_))
    ));

    let updated = cluster.update_service(created).await.unwrap();
    assert_eq!(updated.spec.cluster_ip, ip);
}

#[tokio::test]
async fn test_load_balancer_hostname_assignment() {
    let cluster = MemoryCluster::new().with_addresses(Convergence::AfterChecks(2));
    cluster
        .create_service(service("shop-lb", ServiceType::LoadBalancer))
        .await
        .unwrap();

    let first = cluster.get_service("dev-shop", "shop-lb").await.unwrap();
    assert!(first.status.ingress_hostname.is_none());
    let second = cluster.get_service("dev-shop", "shop-lb").await.unwrap();
    assert_eq!(
        second.status.ingress_hostname.as_deref(),
        Some("shop-lb-dev-shop.lb.keel.test")
    );
}

#[tokio::test]
async fn test_cluster_ip_services_never_get_hostnames() {
    let cluster = MemoryCluster::new();
    cluster
        .create_service(service("shop-web", ServiceType::ClusterIp))
        .await
        .unwrap();
    let svc = cluster.get_service("dev-shop", "shop-web").await.unwrap();
    assert!(svc.status.ingress_hostname.is_none());
}

#[tokio::test]
async fn test_unreachable_cluster_fails_check() {
    let cluster = MemoryCluster::new();
    cluster.check().await.unwrap();
    cluster.set_reachable(false);
    assert!(matches!(
        cluster.check().await,
        Err(ClusterError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let cluster = MemoryCluster::new();
    assert!(cluster
        .delete_service("dev-shop", "ghost")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(cluster
        .delete_workload("dev-shop", "ghost")
        .await
        .unwrap_err()
        .is_not_found());
}
