//! Kubernetes control plane
//!
//! [`KubeCluster`] implements [`ClusterApi`] on a `kube` client. Workloads
//! are `apps/v1` Deployments; exposures are `v1` Services.

mod convert;

use crate::api::ClusterApi;
use crate::error::{ClusterError, Result};
use crate::resources::{
    ClusterService, LabelSelector, Namespace, Pod, ReplicaSet, Secret, Workload,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet as KubeReplicaSet};
use k8s_openapi::api::core::v1::{
    Namespace as KubeNamespace, Pod as KubePod, Secret as KubeSecret, Service as KubeService,
};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Config};
use tracing::{debug, info};

/// Map a client error onto the cluster error taxonomy
fn api_error(kind: &'static str, name: &str, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::not_found(kind, name),
            409 if response.reason == "AlreadyExists" => ClusterError::already_exists(kind, name),
            409 => ClusterError::conflict(kind, name, response.message),
            400 | 422 => ClusterError::Invalid(format!("{} {}: {}", kind, name, response.message)),
            _ => ClusterError::Unavailable(format!("{} ({})", response.message, response.code)),
        },
        other => ClusterError::Unavailable(other.to_string()),
    }
}

/// Cluster backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to `endpoint` with a bearer token. An empty endpoint falls
    /// back to the local kubeconfig or the in-cluster service account.
    pub async fn connect(endpoint: &str, token: &str) -> Result<Self> {
        let mut config = if endpoint.is_empty() {
            Config::infer()
                .await
                .map_err(|e| ClusterError::Unavailable(format!("no cluster configuration: {}", e)))?
        } else {
            let url = endpoint.parse().map_err(|e| {
                ClusterError::Unavailable(format!("invalid api endpoint {}: {}", endpoint, e))
            })?;
            Config::new(url)
        };
        if !token.is_empty() {
            config.auth_info.token = Some(token.to_string().into());
        }

        let server = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        info!(server = %server, "Kubernetes client ready");
        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<KubeReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<KubePod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<KubeSecret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<KubeService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<KubeNamespace> {
        Api::all(self.client.clone())
    }
}

fn labelled(selector: &LabelSelector) -> ListParams {
    ListParams::default().labels(&convert::selector_query(selector))
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn check(&self) -> Result<()> {
        self.namespaces()
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        debug!("Kubernetes API reachable");
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.namespaces()
            .get(name)
            .await
            .map(convert::namespace_from)
            .map_err(|e| api_error("namespace", name, e))
    }

    async fn create_namespace(&self, namespace: Namespace) -> Result<Namespace> {
        let object: KubeNamespace = convert::to_object(convert::namespace_manifest(&namespace))?;
        self.namespaces()
            .create(&PostParams::default(), &object)
            .await
            .map(convert::namespace_from)
            .map_err(|e| api_error("namespace", &namespace.meta.name, e))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets(namespace)
            .get(name)
            .await
            .map(convert::secret_from)
            .map_err(|e| api_error("secret", name, e))
    }

    async fn create_secret(&self, secret: Secret) -> Result<Secret> {
        let object: KubeSecret = convert::to_object(convert::secret_manifest(&secret))?;
        self.secrets(&secret.meta.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map(convert::secret_from)
            .map_err(|e| api_error("secret", &secret.meta.name, e))
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        self.deployments(namespace)
            .get(name)
            .await
            .map(convert::workload_from)
            .map_err(|e| api_error("workload", name, e))
    }

    async fn create_workload(&self, workload: Workload) -> Result<Workload> {
        let object: Deployment = convert::to_object(convert::deployment_manifest(&workload))?;
        self.deployments(&workload.meta.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map(convert::workload_from)
            .map_err(|e| api_error("workload", &workload.meta.name, e))
    }

    async fn update_workload(&self, workload: Workload) -> Result<Workload> {
        let object: Deployment = convert::to_object(convert::deployment_manifest(&workload))?;
        self.deployments(&workload.meta.namespace)
            .replace(&workload.meta.name, &PostParams::default(), &object)
            .await
            .map(convert::workload_from)
            .map_err(|e| api_error("workload", &workload.meta.name, e))
    }

    async fn list_workloads(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Workload>> {
        let list = self
            .deployments(namespace)
            .list(&labelled(selector))
            .await
            .map_err(|e| api_error("workload", namespace, e))?;
        Ok(list.items.into_iter().map(convert::workload_from).collect())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()> {
        // Orphan: replica sets and pods are removed by the caller
        self.deployments(namespace)
            .delete(name, &DeleteParams::orphan())
            .await
            .map(|_| ())
            .map_err(|e| api_error("workload", name, e))
    }

    async fn list_replica_sets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>> {
        let list = self
            .replica_sets(namespace)
            .list(&labelled(selector))
            .await
            .map_err(|e| api_error("replica set", namespace, e))?;
        Ok(list.items.into_iter().map(convert::replica_set_from).collect())
    }

    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.replica_sets(namespace)
            .delete(name, &DeleteParams::orphan())
            .await
            .map(|_| ())
            .map_err(|e| api_error("replica set", name, e))
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&labelled(selector))
            .await
            .map_err(|e| api_error("pod", namespace, e))?;
        Ok(list.items.into_iter().map(convert::pod_from).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| api_error("pod", name, e))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ClusterService> {
        self.services(namespace)
            .get(name)
            .await
            .map(convert::service_from)
            .map_err(|e| api_error("service", name, e))
    }

    async fn create_service(&self, service: ClusterService) -> Result<ClusterService> {
        let object: KubeService = convert::to_object(convert::service_manifest(&service))?;
        self.services(&service.meta.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map(convert::service_from)
            .map_err(|e| api_error("service", &service.meta.name, e))
    }

    async fn update_service(&self, service: ClusterService) -> Result<ClusterService> {
        let object: KubeService = convert::to_object(convert::service_manifest(&service))?;
        self.services(&service.meta.namespace)
            .replace(&service.meta.name, &PostParams::default(), &object)
            .await
            .map(convert::service_from)
            .map_err(|e| api_error("service", &service.meta.name, e))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| api_error("service", name, e))
    }
}
