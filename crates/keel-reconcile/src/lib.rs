//! Keel Reconcile - cluster reconcilers for the delivery engine
//!
//! This crate provides:
//! - Deployments: converge a project's workloads to a deploy command
//! - Load balancers: converge one exposure object per expose command
//! - Manifest: desired-state objects built from command payloads
//! - Naming: deterministic, DNS-safe object names and labels
//! - Poll: interval and deadline driven status polling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod deploy;
pub mod error;
pub mod load_balancer;
pub mod manifest;
pub mod naming;
pub mod ops;
pub mod poll;
pub mod status;

pub use config::{ClusterBackend, KubernetesConfig, RegistryConfig};
pub use deploy::DeploymentReconciler;
pub use error::{ReconcileError, Result};
pub use load_balancer::LoadBalancerReconciler;
pub use poll::{PollTick, Poller};

use keel_cluster::ClusterApi;
use keel_core::{PluginRegistry, Reconciler, WorkerOptions};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Register both reconcilers against one cluster. Options missing from
/// `options` fall back to the registry defaults.
pub fn register(
    registry: &mut PluginRegistry,
    cluster: Arc<dyn ClusterApi>,
    config: &KubernetesConfig,
    options: &BTreeMap<String, WorkerOptions>,
) -> keel_core::Result<()> {
    let opts = |name: &str| options.get(name).copied().unwrap_or_default();

    let (c, k) = (cluster.clone(), config.clone());
    registry.register_with(DeploymentReconciler::NAME, opts(DeploymentReconciler::NAME), move || {
        Arc::new(DeploymentReconciler::new(c.clone(), k.clone())) as Arc<dyn Reconciler>
    })?;

    let (c, k) = (cluster, config.clone());
    registry.register_with(LoadBalancerReconciler::NAME, opts(LoadBalancerReconciler::NAME), move || {
        Arc::new(LoadBalancerReconciler::new(c.clone(), k.clone())) as Arc<dyn Reconciler>
    })?;

    Ok(())
}
