//! Mapping between the cluster model and Kubernetes API objects.
//!
//! Writes go through the API's JSON shape and are decoded into the typed
//! objects, so every field keeps its wire name. Reads map back only what
//! the reconcilers inspect: metadata, replica counts, selectors, rollout
//! status, pod waiting reasons and load-balancer ingress.

use crate::error::{ClusterError, Result};
use crate::resources::{
    ClusterService, Container, ContainerPort, DeploymentStrategy, LabelSelector, Namespace,
    ObjectMeta, Pod, PodPhase, PodTemplate, Probe, ProbeHandler, ReplicaSet, Secret, SecretType,
    ServicePort, ServiceSpec, ServiceStatus, ServiceType, TransportProtocol, Workload,
    WorkloadSpec, WorkloadStatus,
};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentStrategy as KubeStrategy, ReplicaSet as KubeReplicaSet,
};
use k8s_openapi::api::core::v1::{
    Container as KubeContainer, Namespace as KubeNamespace, Pod as KubePod,
    Secret as KubeSecret, Service as KubeService, ServicePort as KubeServicePort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

const DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";

/// Decode a manifest into its typed API object
pub(crate) fn to_object<K: DeserializeOwned>(manifest: Value) -> Result<K> {
    serde_json::from_value(manifest).map_err(|e| ClusterError::Invalid(e.to_string()))
}

/// `k=v,k2=v2` label query
pub(crate) fn selector_query(selector: &LabelSelector) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

fn metadata(meta: &ObjectMeta) -> Value {
    let mut out = json!({ "name": meta.name });
    if !meta.namespace.is_empty() {
        out["namespace"] = json!(meta.namespace);
    }
    if !meta.labels.is_empty() {
        out["labels"] = json!(meta.labels);
    }
    if !meta.annotations.is_empty() {
        out["annotations"] = json!(meta.annotations);
    }
    if !meta.resource_version.is_empty() {
        out["resourceVersion"] = json!(meta.resource_version);
    }
    out
}

fn protocol(transport: TransportProtocol) -> &'static str {
    match transport {
        TransportProtocol::Tcp => "TCP",
        TransportProtocol::Udp => "UDP",
    }
}

fn health_check(check: &Probe) -> Value {
    let mut out = match &check.handler {
        ProbeHandler::TcpSocket { port } => json!({ "tcpSocket": { "port": port } }),
        ProbeHandler::Exec { command } => json!({ "exec": { "command": command } }),
    };
    out["initialDelaySeconds"] = json!(check.initial_delay_seconds);
    out["periodSeconds"] = json!(check.period_seconds);
    out
}

fn container(container: &Container) -> Value {
    let ports: Vec<Value> = container
        .ports
        .iter()
        .map(|p| json!({ "containerPort": p.container_port, "protocol": protocol(p.protocol) }))
        .collect();
    let env: Vec<Value> = container
        .env
        .iter()
        .map(|e| {
            json!({
                "name": e.name,
                "valueFrom": { "secretKeyRef": { "name": e.secret_name, "key": e.secret_key } },
            })
        })
        .collect();
    let mounts: Vec<Value> = container
        .volume_mounts
        .iter()
        .map(|m| json!({ "name": m.name, "mountPath": m.mount_path, "readOnly": m.read_only }))
        .collect();

    let mut out = json!({
        "name": container.name,
        "image": container.image,
        "ports": ports,
        "env": env,
        "volumeMounts": mounts,
        "resources": {
            "requests": container.resources.requests,
            "limits": container.resources.limits,
        },
    });
    if !container.command.is_empty() {
        out["command"] = json!(container.command);
    }
    if let Some(p) = &container.readiness_probe {
        out["readinessProbe"] = health_check(p);
    }
    if let Some(p) = &container.liveness_probe {
        out["livenessProbe"] = health_check(p);
    }
    out
}

fn pod_template(template: &PodTemplate) -> Value {
    let volumes: Vec<Value> = template
        .volumes
        .iter()
        .map(|v| {
            let items: Vec<Value> = v
                .items
                .iter()
                .map(|i| json!({ "key": i.key, "path": i.path }))
                .collect();
            json!({ "name": v.name, "secret": { "secretName": v.secret_name, "items": items } })
        })
        .collect();
    let pull_secrets: Vec<Value> = template
        .image_pull_secrets
        .iter()
        .map(|name| json!({ "name": name }))
        .collect();

    let mut spec = json!({
        "containers": template.containers.iter().map(container).collect::<Vec<_>>(),
        "volumes": volumes,
        "imagePullSecrets": pull_secrets,
    });
    if !template.node_selector.is_empty() {
        spec["nodeSelector"] = json!(template.node_selector);
    }
    if let Some(grace) = template.termination_grace_period_seconds {
        spec["terminationGracePeriodSeconds"] = json!(grace);
    }
    json!({ "metadata": { "labels": template.labels }, "spec": spec })
}

fn strategy(strategy: &DeploymentStrategy) -> Value {
    match strategy {
        DeploymentStrategy::Recreate => json!({ "type": "Recreate" }),
        DeploymentStrategy::RollingUpdate {
            max_surge,
            max_unavailable,
        } => json!({
            "type": "RollingUpdate",
            "rollingUpdate": { "maxSurge": max_surge, "maxUnavailable": max_unavailable },
        }),
    }
}

pub(crate) fn namespace_manifest(namespace: &Namespace) -> Value {
    json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": metadata(&namespace.meta) })
}

pub(crate) fn secret_manifest(secret: &Secret) -> Value {
    let kind = match secret.kind {
        SecretType::Opaque => "Opaque",
        SecretType::DockerConfigJson => DOCKER_CONFIG_JSON,
    };
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata(&secret.meta),
        "type": kind,
        "stringData": secret.data,
    })
}

pub(crate) fn deployment_manifest(workload: &Workload) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(&workload.meta),
        "spec": {
            "replicas": workload.spec.replicas,
            "selector": { "matchLabels": workload.spec.selector },
            "strategy": strategy(&workload.spec.strategy),
            "template": pod_template(&workload.spec.template),
        },
    })
}

pub(crate) fn service_manifest(service: &ClusterService) -> Value {
    let kind = match service.spec.kind {
        ServiceType::ClusterIp => "ClusterIP",
        ServiceType::LoadBalancer => "LoadBalancer",
    };
    let ports: Vec<Value> = service
        .spec
        .ports
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "port": p.port,
                "targetPort": p.target_port,
                "protocol": protocol(p.protocol),
            })
        })
        .collect();

    let mut spec = json!({ "type": kind, "selector": service.spec.selector, "ports": ports });
    if let Some(ip) = &service.spec.cluster_ip {
        spec["clusterIP"] = json!(ip);
    }
    if !service.spec.load_balancer_source_ranges.is_empty() {
        spec["loadBalancerSourceRanges"] = json!(service.spec.load_balancer_source_ranges);
    }
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(&service.meta),
        "spec": spec,
    })
}

fn meta_from(meta: KubeMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        resource_version: meta.resource_version.unwrap_or_default(),
        generation: meta.generation.unwrap_or_default(),
    }
}

fn transport_from(protocol: Option<&str>) -> TransportProtocol {
    match protocol {
        Some("UDP") => TransportProtocol::Udp,
        _ => TransportProtocol::Tcp,
    }
}

fn int_or_string(value: IntOrString) -> String {
    match value {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s,
    }
}

fn strategy_from(strategy: KubeStrategy) -> DeploymentStrategy {
    if strategy.type_.as_deref() == Some("Recreate") {
        return DeploymentStrategy::Recreate;
    }
    // API server defaults
    let rolling = strategy.rolling_update.unwrap_or_default();
    DeploymentStrategy::RollingUpdate {
        max_surge: rolling.max_surge.map_or_else(|| "25%".to_string(), int_or_string),
        max_unavailable: rolling
            .max_unavailable
            .map_or_else(|| "25%".to_string(), int_or_string),
    }
}

fn container_from(container: KubeContainer) -> Container {
    Container {
        name: container.name,
        image: container.image.unwrap_or_default(),
        command: container.command.unwrap_or_default(),
        ports: container
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| ContainerPort {
                container_port: p.container_port,
                protocol: transport_from(p.protocol.as_deref()),
            })
            .collect(),
        ..Container::default()
    }
}

pub(crate) fn namespace_from(namespace: KubeNamespace) -> Namespace {
    Namespace {
        meta: meta_from(namespace.metadata),
    }
}

pub(crate) fn secret_from(secret: KubeSecret) -> Secret {
    let kind = match secret.type_.as_deref() {
        Some(DOCKER_CONFIG_JSON) => SecretType::DockerConfigJson,
        _ => SecretType::Opaque,
    };
    let data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, String::from_utf8_lossy(&value.0).into_owned()))
        .collect();
    Secret {
        meta: meta_from(secret.metadata),
        kind,
        data,
    }
}

pub(crate) fn workload_from(deployment: Deployment) -> Workload {
    let spec = deployment.spec.unwrap_or_default();
    let status = deployment.status.unwrap_or_default();
    let pod = spec.template.spec.unwrap_or_default();

    Workload {
        meta: meta_from(deployment.metadata),
        spec: WorkloadSpec {
            replicas: spec.replicas.unwrap_or(1),
            selector: spec.selector.match_labels.unwrap_or_default(),
            strategy: spec.strategy.map(strategy_from).unwrap_or_default(),
            template: PodTemplate {
                labels: spec
                    .template
                    .metadata
                    .and_then(|m| m.labels)
                    .unwrap_or_default(),
                containers: pod.containers.into_iter().map(container_from).collect(),
                node_selector: pod.node_selector.unwrap_or_default(),
                termination_grace_period_seconds: pod.termination_grace_period_seconds,
                ..PodTemplate::default()
            },
        },
        status: WorkloadStatus {
            observed_generation: status.observed_generation.unwrap_or_default(),
            updated_replicas: status.updated_replicas.unwrap_or_default(),
            available_replicas: status.available_replicas.unwrap_or_default(),
            unavailable_replicas: status.unavailable_replicas.unwrap_or_default(),
        },
    }
}

pub(crate) fn replica_set_from(replica_set: KubeReplicaSet) -> ReplicaSet {
    let owner = replica_set
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.kind == "Deployment")
        .map(|r| r.name.clone())
        .unwrap_or_default();
    ReplicaSet {
        replicas: replica_set
            .spec
            .and_then(|s| s.replicas)
            .unwrap_or_default(),
        meta: meta_from(replica_set.metadata),
        owner,
    }
}

pub(crate) fn pod_from(pod: KubePod) -> Pod {
    let status = pod.status.unwrap_or_default();
    let phase = match status.phase.as_deref() {
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Pending,
    };
    let waiting_reason = status
        .container_statuses
        .unwrap_or_default()
        .into_iter()
        .find_map(|c| c.state.and_then(|s| s.waiting).and_then(|w| w.reason));
    Pod {
        meta: meta_from(pod.metadata),
        phase,
        waiting_reason,
    }
}

fn port_from(port: KubeServicePort) -> ServicePort {
    let target_port = match port.target_port {
        Some(IntOrString::Int(n)) => n,
        _ => port.port,
    };
    ServicePort {
        name: port.name.unwrap_or_default(),
        port: port.port,
        target_port,
        protocol: transport_from(port.protocol.as_deref()),
    }
}

pub(crate) fn service_from(service: KubeService) -> ClusterService {
    let spec = service.spec.unwrap_or_default();
    let ingress_hostname = service
        .status
        .and_then(|s| s.load_balancer)
        .and_then(|lb| lb.ingress)
        .and_then(|ingress| ingress.into_iter().find_map(|i| i.hostname.or(i.ip)));

    ClusterService {
        meta: meta_from(service.metadata),
        spec: ServiceSpec {
            kind: match spec.type_.as_deref() {
                Some("LoadBalancer") => ServiceType::LoadBalancer,
                _ => ServiceType::ClusterIp,
            },
            selector: spec.selector.unwrap_or_default(),
            ports: spec.ports.unwrap_or_default().into_iter().map(port_from).collect(),
            cluster_ip: spec.cluster_ip.filter(|ip| !ip.is_empty() && ip != "None"),
            load_balancer_source_ranges: spec.load_balancer_source_ranges.unwrap_or_default(),
        },
        status: ServiceStatus { ingress_hostname },
    }
}
