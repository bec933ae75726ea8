//! Cluster object model
//!
//! A narrow subset of the orchestrator's objects: only the fields the
//! reconcilers read or write. Names and field meanings follow the
//! Kubernetes API so the model maps onto a real client one-to-one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label map
pub type Labels = BTreeMap<String, String>;

/// Equality-based label selector: every pair must be present
pub type LabelSelector = BTreeMap<String, String>;

/// Whether `labels` satisfies `selector`
#[must_use]
pub fn selector_matches(selector: &LabelSelector, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Metadata common to every object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name
    pub name: String,
    /// Owning namespace; empty for cluster-scoped objects
    #[serde(default)]
    pub namespace: String,
    /// Labels
    #[serde(default)]
    pub labels: Labels,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Opaque version assigned by the control plane; updates must echo it
    #[serde(default)]
    pub resource_version: String,
    /// Spec generation, bumped on every spec change
    #[serde(default)]
    pub generation: i64,
}

impl ObjectMeta {
    /// Metadata for a namespaced object
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Namespace
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Namespace {
    /// Metadata (namespace field unused)
    pub meta: ObjectMeta,
}

/// Secret payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecretType {
    /// Generic key/value bundle
    #[default]
    Opaque,
    /// Registry pull credentials under `.dockerconfigjson`
    DockerConfigJson,
}

/// Secret
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Secret {
    /// Metadata
    pub meta: ObjectMeta,
    /// Payload type
    #[serde(default)]
    pub kind: SecretType,
    /// Plain-text values by key
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Transport protocol of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

/// Container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    /// Port number
    pub container_port: i32,
    /// Transport
    pub protocol: TransportProtocol,
}

/// Environment variable sourced from a secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Secret holding the value
    pub secret_name: String,
    /// Key within the secret
    pub secret_key: String,
}

/// Mount of a pod volume into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Path in the container
    pub mount_path: String,
    /// Mounted read-only
    pub read_only: bool,
}

/// Secret key projected to a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToPath {
    /// Secret key
    pub key: String,
    /// Relative file path
    pub path: String,
}

/// Secret-backed pod volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Source secret
    pub secret_name: String,
    /// Projected keys
    pub items: Vec<KeyToPath>,
}

/// How a probe checks the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeHandler {
    /// Open a TCP socket to the port
    TcpSocket {
        /// Port to dial
        port: i32,
    },
    /// Run a command in the container
    Exec {
        /// Command line
        command: Vec<String>,
    },
}

/// Readiness or liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Check
    pub handler: ProbeHandler,
    /// Delay before the first check
    pub initial_delay_seconds: i32,
    /// Interval between checks
    pub period_seconds: i32,
}

/// Requests and limits by resource name ("cpu", "memory")
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Guaranteed amounts
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    /// Ceilings
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Container spec
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Command override
    #[serde(default)]
    pub command: Vec<String>,
    /// Exposed ports
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    /// Environment
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Volume mounts
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Readiness probe
    #[serde(default)]
    pub readiness_probe: Option<Probe>,
    /// Liveness probe
    #[serde(default)]
    pub liveness_probe: Option<Probe>,
    /// Requests and limits
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// Pod template of a workload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodTemplate {
    /// Pod labels; must satisfy the workload selector
    pub labels: Labels,
    /// Containers
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Node placement constraints
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Pull secret names
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    /// Grace period between SIGTERM and SIGKILL
    #[serde(default)]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Replacement strategy for a workload's pods
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentStrategy {
    /// Kill all old pods before starting new ones
    #[default]
    Recreate,
    /// Replace pods gradually
    RollingUpdate {
        /// Extra pods allowed above the desired count
        max_surge: String,
        /// Pods allowed to be unavailable during the rollout
        max_unavailable: String,
    },
}

/// Desired workload state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Desired replica count
    pub replicas: i32,
    /// Pods owned by this workload
    pub selector: LabelSelector,
    /// Rollout strategy
    pub strategy: DeploymentStrategy,
    /// Pod template
    pub template: PodTemplate,
}

/// Observed rollout state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Generation the controller last acted on
    pub observed_generation: i64,
    /// Pods running the current template
    pub updated_replicas: i32,
    /// Pods ready for at least min-ready seconds
    pub available_replicas: i32,
    /// Pods still missing to reach the desired count
    pub unavailable_replicas: i32,
}

/// Replica-managed container group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workload {
    /// Metadata
    pub meta: ObjectMeta,
    /// Desired state
    pub spec: WorkloadSpec,
    /// Observed state, filled in by the control plane
    #[serde(default)]
    pub status: WorkloadStatus,
}

/// Replica set created by a workload rollout
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaSet {
    /// Metadata; labels copied from the pod template
    pub meta: ObjectMeta,
    /// Owning workload name
    pub owner: String,
    /// Desired replica count
    pub replicas: i32,
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    /// Scheduled, containers not all started
    #[default]
    Pending,
    /// Containers running
    Running,
    /// Containers exited
    Succeeded,
    /// A container failed
    Failed,
}

/// Pod
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pod {
    /// Metadata; labels copied from the pod template
    pub meta: ObjectMeta,
    /// Phase
    pub phase: PodPhase,
    /// Why the container is not running yet (`ImagePullBackOff`, ...)
    #[serde(default)]
    pub waiting_reason: Option<String>,
}

/// How a service is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceType {
    /// Cluster-local virtual IP
    #[default]
    ClusterIp,
    /// Cloud load balancer
    LoadBalancer,
}

/// Service port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port name, unique within the service
    pub name: String,
    /// Port clients connect to
    pub port: i32,
    /// Container port traffic is sent to
    pub target_port: i32,
    /// Transport
    pub protocol: TransportProtocol,
}

/// Desired service state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Exposure type
    pub kind: ServiceType,
    /// Pods receiving traffic
    pub selector: LabelSelector,
    /// Ports
    pub ports: Vec<ServicePort>,
    /// Virtual IP; assigned on create and immutable afterwards
    #[serde(default)]
    pub cluster_ip: Option<String>,
    /// Client CIDRs allowed through a cloud load balancer
    #[serde(default)]
    pub load_balancer_source_ranges: Vec<String>,
}

/// Observed service state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Hostname assigned by the cloud provider
    #[serde(default)]
    pub ingress_hostname: Option<String>,
}

/// Network exposure object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterService {
    /// Metadata
    pub meta: ObjectMeta,
    /// Desired state
    pub spec: ServiceSpec,
    /// Observed state
    #[serde(default)]
    pub status: ServiceStatus,
}

#[cfg(test)]
mod tests;
