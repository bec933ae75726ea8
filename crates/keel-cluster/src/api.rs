//! Control-plane boundary
//!
//! Every cluster call the reconcilers make goes through [`ClusterApi`].
//! Implementations must provide optimistic concurrency: an update whose
//! `resource_version` is not the current one fails with `Conflict`.

use crate::error::Result;
use crate::resources::{ClusterService, LabelSelector, Namespace, Pod, ReplicaSet, Secret, Workload};
use async_trait::async_trait;

/// Cluster control-plane operations used by the reconcilers
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Verify endpoint and credentials
    async fn check(&self) -> Result<()>;

    /// Get a namespace
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    /// Create a namespace
    async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace>;

    /// Get a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Create a secret
    async fn create_secret(&self, secret: Secret) -> Result<Secret>;

    /// Get a workload with its current status
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload>;

    /// Create a workload
    async fn create_workload(&self, workload: Workload) -> Result<Workload>;

    /// Replace a workload; `meta.resource_version` must be current
    async fn update_workload(&self, workload: Workload) -> Result<Workload>;

    /// List workloads matching a selector
    async fn list_workloads(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Workload>>;

    /// Delete a workload (no cascade)
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()>;

    /// List replica sets matching a selector
    async fn list_replica_sets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>>;

    /// Delete a replica set (no cascade)
    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()>;

    /// List pods matching a selector
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a service with its current status
    async fn get_service(&self, namespace: &str, name: &str) -> Result<ClusterService>;

    /// Create a service
    async fn create_service(&self, service: ClusterService) -> Result<ClusterService>;

    /// Replace a service; `meta.resource_version` must be current
    async fn update_service(&self, service: ClusterService) -> Result<ClusterService>;

    /// Delete a service
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}
