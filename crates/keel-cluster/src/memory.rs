//! In-memory control plane
//!
//! Behaves like a small orchestrator: resource versions and generations,
//! replica sets and pods per rollout, cluster IPs, and cloud hostnames.
//! How quickly rollouts converge and hostnames appear is configurable so
//! reconcilers can be exercised against slow, stuck and broken clusters.

use crate::api::ClusterApi;
use crate::error::{ClusterError, Result};
use crate::resources::{
    selector_matches, ClusterService, LabelSelector, Namespace, ObjectMeta, Pod, PodPhase,
    ReplicaSet, Secret, ServiceType, Workload, WorkloadStatus,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Waiting reason reported by pods of an unresolvable image
pub const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";

/// When an asynchronous cluster process finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convergence {
    /// On the first read after a change
    #[default]
    Immediate,
    /// After this many reads
    AfterChecks(u32),
    /// Never
    Never,
}

impl Convergence {
    fn reached(self, checks: u32) -> bool {
        match self {
            Self::Immediate => true,
            Self::AfterChecks(n) => checks >= n,
            Self::Never => false,
        }
    }
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

struct WorkloadEntry {
    workload: Workload,
    checks: u32,
}

struct ServiceEntry {
    service: ClusterService,
    checks: u32,
}

struct State {
    reachable: bool,
    rollout: Convergence,
    addresses: Convergence,
    bad_images: HashSet<String>,
    next_version: u64,
    next_ip: u32,
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    workloads: BTreeMap<Key, WorkloadEntry>,
    replica_sets: BTreeMap<Key, ReplicaSet>,
    pods: BTreeMap<Key, Pod>,
    services: BTreeMap<Key, ServiceEntry>,
}

impl State {
    fn version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn cluster_ip(&mut self) -> String {
        self.next_ip += 1;
        format!("10.96.{}.{}", self.next_ip / 256, self.next_ip % 256)
    }

    fn hostname(namespace: &str, name: &str) -> String {
        format!("{}-{}.lb.keel.test", name, namespace)
    }

    fn image_is_bad(&self, workload: &Workload) -> bool {
        workload
            .spec
            .template
            .containers
            .iter()
            .any(|c| self.bad_images.contains(&c.image))
    }

    /// Replace the workload's pods with a fresh replica set for its
    /// current generation; older replica sets are scaled to zero.
    fn roll(&mut self, workload: &Workload) {
        let namespace = &workload.meta.namespace;
        let owner = &workload.meta.name;

        let stale: Vec<Key> = self
            .replica_sets
            .iter()
            .filter(|((ns, _), rs)| ns == namespace && &rs.owner == owner)
            .map(|(k, _)| k.clone())
            .collect();
        for rs_key in stale {
            if let Some(rs) = self.replica_sets.get_mut(&rs_key) {
                rs.replicas = 0;
                let labels = rs.meta.labels.clone();
                self.pods
                    .retain(|(ns, _), pod| ns != namespace || !selector_matches(&labels, &pod.meta.labels));
            }
        }

        let hash = workload.meta.generation.to_string();
        let mut labels = workload.spec.template.labels.clone();
        labels.insert("pod-template-hash".to_string(), hash.clone());

        let rs_name = format!("{}-{}", owner, hash);
        let mut rs_meta = ObjectMeta::new(namespace.clone(), rs_name.clone());
        rs_meta.labels = labels.clone();
        rs_meta.resource_version = self.version();
        self.replica_sets.insert(
            key(namespace, &rs_name),
            ReplicaSet {
                meta: rs_meta,
                owner: owner.clone(),
                replicas: workload.spec.replicas,
            },
        );

        let bad = self.image_is_bad(workload);
        for index in 0..workload.spec.replicas.max(0) {
            let pod_name = format!("{}-{}", rs_name, index);
            let mut meta = ObjectMeta::new(namespace.clone(), pod_name.clone());
            meta.labels = labels.clone();
            meta.resource_version = self.version();
            self.pods.insert(
                key(namespace, &pod_name),
                Pod {
                    meta,
                    phase: PodPhase::Pending,
                    waiting_reason: bad.then(|| IMAGE_PULL_BACK_OFF.to_string()),
                },
            );
        }
    }

    /// Status as the workload controller would report it now
    fn observe_workload(&mut self, k: &Key) -> Option<Workload> {
        let (rollout, namespace) = (self.rollout, k.0.clone());
        let entry = self.workloads.get_mut(k)?;
        entry.checks += 1;
        let checks = entry.checks;

        let workload = entry.workload.clone();
        let desired = workload.spec.replicas;
        let bad = self.image_is_bad(&workload);
        let ready = desired == 0 || (!bad && rollout.reached(checks));

        let status = if ready {
            WorkloadStatus {
                observed_generation: workload.meta.generation,
                updated_replicas: desired,
                available_replicas: desired,
                unavailable_replicas: 0,
            }
        } else {
            WorkloadStatus {
                observed_generation: workload.meta.generation,
                updated_replicas: desired,
                available_replicas: 0,
                unavailable_replicas: desired,
            }
        };

        if let Some(entry) = self.workloads.get_mut(k) {
            entry.workload.status = status.clone();
        }
        if ready {
            let selector = workload.spec.selector.clone();
            for ((ns, _), pod) in self.pods.iter_mut() {
                if *ns == namespace && selector_matches(&selector, &pod.meta.labels) {
                    pod.phase = PodPhase::Running;
                }
            }
        }

        let mut observed = workload;
        observed.status = status;
        Some(observed)
    }
}

/// In-memory [`ClusterApi`]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// A reachable cluster where everything converges immediately
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                rollout: Convergence::Immediate,
                addresses: Convergence::Immediate,
                bad_images: HashSet::new(),
                next_version: 0,
                next_ip: 0,
                namespaces: BTreeMap::new(),
                secrets: BTreeMap::new(),
                workloads: BTreeMap::new(),
                replica_sets: BTreeMap::new(),
                pods: BTreeMap::new(),
                services: BTreeMap::new(),
            }),
        }
    }

    /// Set rollout convergence
    #[must_use]
    pub fn with_rollout(self, rollout: Convergence) -> Self {
        self.lock().rollout = rollout;
        self
    }

    /// Set load-balancer hostname assignment
    #[must_use]
    pub fn with_addresses(self, addresses: Convergence) -> Self {
        self.lock().addresses = addresses;
        self
    }

    /// Pods of workloads using this image never start
    #[must_use]
    pub fn with_unresolvable_image(self, image: impl Into<String>) -> Self {
        self.lock().bad_images.insert(image.into());
        self
    }

    /// Toggle reachability; an unreachable cluster fails `check`
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a namespace exists
    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains_key(name)
    }

    /// Secret names in a namespace
    #[must_use]
    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        names_in(&self.lock().secrets, namespace)
    }

    /// Workload names in a namespace
    #[must_use]
    pub fn workload_names(&self, namespace: &str) -> Vec<String> {
        names_in(&self.lock().workloads, namespace)
    }

    /// Replica set names in a namespace
    #[must_use]
    pub fn replica_set_names(&self, namespace: &str) -> Vec<String> {
        names_in(&self.lock().replica_sets, namespace)
    }

    /// Pod names in a namespace
    #[must_use]
    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        names_in(&self.lock().pods, namespace)
    }

    /// Service names in a namespace
    #[must_use]
    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        names_in(&self.lock().services, namespace)
    }

    /// Stored workload, without counting as a controller read
    #[must_use]
    pub fn workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.lock()
            .workloads
            .get(&key(namespace, name))
            .map(|e| e.workload.clone())
    }

    /// Stored service, without counting as a controller read
    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<ClusterService> {
        self.lock()
            .services
            .get(&key(namespace, name))
            .map(|e| e.service.clone())
    }

    /// Stored secret
    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(namespace, name)).cloned()
    }
}

fn names_in<V>(map: &BTreeMap<Key, V>, namespace: &str) -> Vec<String> {
    map.keys()
        .filter(|(ns, _)| ns == namespace)
        .map(|(_, name)| name.clone())
        .collect()
}

fn stale(kind: &'static str, name: &str, sent: &str, current: &str) -> ClusterError {
    ClusterError::conflict(
        kind,
        name,
        format!(
            "the object has been modified (resource version {} is not {})",
            sent, current
        ),
    )
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn check(&self) -> Result<()> {
        if self.lock().reachable {
            Ok(())
        } else {
            Err(ClusterError::Unavailable(
                "memory cluster marked unreachable".to_string(),
            ))
        }
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.lock()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("namespace", name))
    }

    async fn create_namespace(&self, mut namespace: Namespace) -> Result<Namespace> {
        let mut state = self.lock();
        let name = namespace.meta.name.clone();
        if state.namespaces.contains_key(&name) {
            return Err(ClusterError::already_exists("namespace", name));
        }
        namespace.meta.resource_version = state.version();
        state.namespaces.insert(name.clone(), namespace.clone());
        debug!(namespace = %name, "Namespace created");
        Ok(namespace)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.lock()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("secret", name))
    }

    async fn create_secret(&self, mut secret: Secret) -> Result<Secret> {
        let mut state = self.lock();
        let k = key(&secret.meta.namespace, &secret.meta.name);
        if state.secrets.contains_key(&k) {
            return Err(ClusterError::already_exists("secret", &secret.meta.name));
        }
        secret.meta.resource_version = state.version();
        state.secrets.insert(k, secret.clone());
        Ok(secret)
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        self.lock()
            .observe_workload(&key(namespace, name))
            .ok_or_else(|| ClusterError::not_found("workload", name))
    }

    async fn create_workload(&self, mut workload: Workload) -> Result<Workload> {
        if !selector_matches(&workload.spec.selector, &workload.spec.template.labels) {
            return Err(ClusterError::Invalid(format!(
                "workload {}: selector does not match template labels",
                workload.meta.name
            )));
        }
        let mut state = self.lock();
        let k = key(&workload.meta.namespace, &workload.meta.name);
        if state.workloads.contains_key(&k) {
            return Err(ClusterError::already_exists("workload", &workload.meta.name));
        }
        workload.meta.resource_version = state.version();
        workload.meta.generation = 1;
        workload.status = WorkloadStatus::default();
        state.roll(&workload);
        state.workloads.insert(
            k,
            WorkloadEntry {
                workload: workload.clone(),
                checks: 0,
            },
        );
        debug!(workload = %workload.meta.name, replicas = workload.spec.replicas, "Workload created");
        Ok(workload)
    }

    async fn update_workload(&self, mut workload: Workload) -> Result<Workload> {
        let mut state = self.lock();
        let k = key(&workload.meta.namespace, &workload.meta.name);
        let current = state
            .workloads
            .get(&k)
            .map(|e| e.workload.clone())
            .ok_or_else(|| ClusterError::not_found("workload", &workload.meta.name))?;
        if workload.meta.resource_version != current.meta.resource_version {
            return Err(stale(
                "workload",
                &workload.meta.name,
                &workload.meta.resource_version,
                &current.meta.resource_version,
            ));
        }

        let changed = workload.spec != current.spec;
        workload.meta.resource_version = state.version();
        workload.meta.generation = current.meta.generation + i64::from(changed);
        workload.status = current.status;
        if changed {
            state.roll(&workload);
        }
        state.workloads.insert(
            k,
            WorkloadEntry {
                workload: workload.clone(),
                checks: 0,
            },
        );
        debug!(workload = %workload.meta.name, generation = workload.meta.generation, "Workload updated");
        Ok(workload)
    }

    async fn list_workloads(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Workload>> {
        Ok(self
            .lock()
            .workloads
            .iter()
            .filter(|((ns, _), e)| ns == namespace && selector_matches(selector, &e.workload.meta.labels))
            .map(|(_, e)| e.workload.clone())
            .collect())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<()> {
        self.lock()
            .workloads
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("workload", name))
    }

    async fn list_replica_sets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>> {
        Ok(self
            .lock()
            .replica_sets
            .iter()
            .filter(|((ns, _), rs)| ns == namespace && selector_matches(selector, &rs.meta.labels))
            .map(|(_, rs)| rs.clone())
            .collect())
    }

    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.lock()
            .replica_sets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("replica set", name))
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && selector_matches(selector, &pod.meta.labels))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.lock()
            .pods
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("pod", name))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ClusterService> {
        let mut state = self.lock();
        let addresses = state.addresses;
        let entry = state
            .services
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ClusterError::not_found("service", name))?;
        entry.checks += 1;
        if entry.service.spec.kind == ServiceType::LoadBalancer
            && entry.service.status.ingress_hostname.is_none()
            && addresses.reached(entry.checks)
        {
            entry.service.status.ingress_hostname = Some(State::hostname(namespace, name));
        }
        Ok(entry.service.clone())
    }

    async fn create_service(&self, mut service: ClusterService) -> Result<ClusterService> {
        let mut state = self.lock();
        let k = key(&service.meta.namespace, &service.meta.name);
        if state.services.contains_key(&k) {
            return Err(ClusterError::already_exists("service", &service.meta.name));
        }
        service.meta.resource_version = state.version();
        if service.spec.cluster_ip.is_none() {
            service.spec.cluster_ip = Some(state.cluster_ip());
        }
        service.status = Default::default();
        state.services.insert(
            k,
            ServiceEntry {
                service: service.clone(),
                checks: 0,
            },
        );
        debug!(service = %service.meta.name, kind = ?service.spec.kind, "Service created");
        Ok(service)
    }

    async fn update_service(&self, mut service: ClusterService) -> Result<ClusterService> {
        let mut state = self.lock();
        let k = key(&service.meta.namespace, &service.meta.name);
        let current = state
            .services
            .get(&k)
            .map(|e| e.service.clone())
            .ok_or_else(|| ClusterError::not_found("service", &service.meta.name))?;
        if service.meta.resource_version != current.meta.resource_version {
            return Err(stale(
                "service",
                &service.meta.name,
                &service.meta.resource_version,
                &current.meta.resource_version,
            ));
        }
        if service.spec.cluster_ip != current.spec.cluster_ip {
            return Err(ClusterError::Invalid(format!(
                "service {}: spec.clusterIP is immutable",
                service.meta.name
            )));
        }

        service.meta.resource_version = state.version();
        service.status = if service.spec.kind == ServiceType::LoadBalancer {
            current.status
        } else {
            Default::default()
        };
        state.services.insert(
            k,
            ServiceEntry {
                service: service.clone(),
                checks: 0,
            },
        );
        Ok(service)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.lock()
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("service", name))
    }
}

#[cfg(test)]
mod tests;
