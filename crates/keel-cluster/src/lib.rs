//! Keel Cluster - control-plane boundary
//!
//! This crate provides:
//! - Resources: the subset of orchestrator objects the reconcilers touch
//! - Api: the [`ClusterApi`] trait (mocked as `MockClusterApi` under the
//!   `mock` feature)
//! - Kubernetes: [`KubeCluster`], the API-server backed implementation
//! - Memory: [`MemoryCluster`], an in-process control plane with
//!   configurable rollout and load-balancer behaviour

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod error;
pub mod kubernetes;
pub mod memory;
pub mod resources;

pub use api::ClusterApi;
#[cfg(any(test, feature = "mock"))]
pub use api::MockClusterApi;
pub use error::{ClusterError, Result};
pub use kubernetes::KubeCluster;
pub use memory::{Convergence, MemoryCluster, IMAGE_PULL_BACK_OFF};
pub use resources::{
    selector_matches, ClusterService, Container, ContainerPort, DeploymentStrategy, EnvVar,
    KeyToPath, LabelSelector, Labels, Namespace, ObjectMeta, Pod, PodPhase, PodTemplate, Probe,
    ProbeHandler, ReplicaSet, ResourceRequirements, Secret, SecretType, ServicePort, ServiceSpec,
    ServiceStatus, ServiceType, TransportProtocol, Volume, VolumeMount, Workload, WorkloadSpec,
    WorkloadStatus,
};
