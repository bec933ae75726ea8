//! Deployment reconciler
//!
//! Converges a project's namespace to the services of a deploy command:
//! namespace, pull secret, a fresh secret bundle, then one workload per
//! service. After the upserts it reports `running`, polls each workload
//! until its rollout converges or the budget runs out, reports the
//! terminal state and finally removes workloads no service maps to.

use crate::config::KubernetesConfig;
use crate::error::{ReconcileError, Result};
use crate::manifest::{self, SecretBundle, WorkloadContext};
use crate::naming;
use crate::ops;
use crate::poll::{PollTick, Poller};
use crate::status::DeployReport;
use async_trait::async_trait;
use keel_cluster::{ClusterApi, Workload};
use keel_core::{
    event_name, Action, DeployPayload, Event, EventSink, Payload, PayloadKind, Reconciler,
    Service, State,
};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pod waiting reasons that will not resolve by waiting longer
pub const FATAL_WAITING_REASONS: [&str; 4] = [
    "ErrImagePull",
    "ImagePullBackOff",
    "CrashLoopBackOff",
    "InvalidImageName",
];

/// Whether the rollout of the workload's current spec has converged
#[must_use]
pub fn rollout_complete(workload: &Workload) -> bool {
    let status = &workload.status;
    status.observed_generation >= workload.meta.generation
        && status.updated_replicas == workload.spec.replicas
        && status.available_replicas >= status.updated_replicas
        && status.unavailable_replicas == 0
}

enum Upserted {
    Applied,
    AlreadyRemoved,
}

enum Outcome {
    Complete,
    Failed,
    TimedOut,
    Cancelled,
}

/// Handles `Deploy:create`, `Deploy:update` and `Deploy:destroy`
pub struct DeploymentReconciler {
    cluster: Arc<dyn ClusterApi>,
    config: KubernetesConfig,
    sink: OnceLock<EventSink>,
    cancel: CancellationToken,
}

impl DeploymentReconciler {
    /// Registry name
    pub const NAME: &'static str = "deployments";

    /// Create a reconciler over a cluster
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, config: KubernetesConfig) -> Self {
        Self {
            cluster,
            config,
            sink: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn sink(&self) -> keel_core::Result<&EventSink> {
        self.sink
            .get()
            .ok_or_else(|| keel_core::Error::configuration(Self::NAME, "reconciler not started"))
    }

    /// Run one reconciliation pass for a deploy command
    pub async fn reconcile(&self, command: &Event, deploy: &DeployPayload) -> keel_core::Result<()> {
        let mut report = DeployReport::new(self.sink()?, command);
        let mut deploy = deploy.clone();
        for service in &mut deploy.services {
            service.resolve(State::Waiting, "");
        }

        let environment = self.config.environment_for(&deploy.environment).to_string();
        let namespace = naming::namespace_name(&environment, &deploy.project.slug);
        let budget = deploy.timeout_or(self.config.deploy_timeout());
        info!(
            project = %deploy.project.slug,
            namespace = %namespace,
            action = %deploy.action,
            services = deploy.services.len(),
            timeout_secs = budget.as_secs(),
            "Deploy started"
        );

        let secrets = match self.prepare(&namespace, &deploy).await {
            Ok(secrets) => secrets,
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Deploy preparation failed");
                let message = e.to_string();
                for service in &mut deploy.services {
                    service.resolve(State::Failed, message.clone());
                }
                return report.finish(&deploy, State::Failed, message).await;
            }
        };

        let mut poller = Poller::new(self.config.poll_interval(), budget, self.cancel.child_token());
        let ctx = WorkloadContext {
            namespace: &namespace,
            slug: &deploy.project.slug,
            image: &deploy.image,
            action: deploy.action,
            node_selector: &self.config.node_selector,
            pull_secret: self.config.registry().map(|r| r.secret_name.as_str()),
            secrets: secrets.as_ref(),
        };
        for service in deploy.services.iter_mut() {
            let destroy = service.is_destroy(ctx.action);
            match self.upsert(manifest::workload(&ctx, service), destroy).await {
                Ok(Upserted::Applied) => {}
                Ok(Upserted::AlreadyRemoved) => service.resolve(State::Complete, "already removed"),
                Err(e) => {
                    warn!(service = %service.name, error = %e, "Workload upsert failed");
                    service.resolve(State::Failed, e.to_string());
                    poller.expire_now();
                }
            }
        }

        report.running(&deploy).await?;

        let total = deploy.services.len();
        let outcome = loop {
            // Recounted every pass so a regression stays visible
            let complete = deploy
                .services
                .iter()
                .filter(|s| s.state == State::Complete)
                .count();
            if complete == total {
                break Outcome::Complete;
            }
            if deploy.services.iter().all(|s| s.state != State::Waiting) {
                break Outcome::Failed;
            }

            match poller.tick().await {
                PollTick::Check => {}
                PollTick::Expired => break Outcome::TimedOut,
                PollTick::Cancelled => break Outcome::Cancelled,
            }

            debug!(namespace = %namespace, complete, total, "Checking rollouts");
            for service in deploy
                .services
                .iter_mut()
                .filter(|s| s.state == State::Waiting)
            {
                self.check(&namespace, &deploy.project.slug, service).await;
            }
        };

        match outcome {
            Outcome::Complete => {
                report.finish(&deploy, State::Complete, "").await?;
                self.cleanup_orphans(&namespace, &deploy).await;
                Ok(())
            }
            Outcome::Failed | Outcome::TimedOut => {
                let message = failure_message(&deploy, budget.as_secs());
                report.finish(&deploy, State::Failed, message).await
            }
            Outcome::Cancelled => {
                warn!(namespace = %namespace, "Deploy cancelled");
                report
                    .finish(&deploy, State::Failed, ReconcileError::Cancelled.to_string())
                    .await
            }
        }
    }

    /// Namespace, pull secret and this pass's secret bundle
    async fn prepare(&self, namespace: &str, deploy: &DeployPayload) -> Result<Option<SecretBundle>> {
        ops::ensure_namespace(self.cluster.as_ref(), namespace).await?;

        if let Some(registry) = self.config.registry() {
            ops::ensure_secret(self.cluster.as_ref(), manifest::pull_secret(namespace, registry)).await?;
        }

        let bundle = SecretBundle::build(namespace, &deploy.project.slug, &deploy.secrets);
        if let Some(bundle) = &bundle {
            self.cluster.create_secret(bundle.secret.clone()).await?;
            debug!(namespace = %namespace, secret = %bundle.name(), entries = deploy.secrets.len(), "Secret bundle created");
        }
        Ok(bundle)
    }

    async fn upsert(&self, mut desired: Workload, destroy: bool) -> Result<Upserted> {
        let (namespace, name) = (desired.meta.namespace.clone(), desired.meta.name.clone());
        match self.cluster.get_workload(&namespace, &name).await {
            Ok(existing) => {
                desired.meta.resource_version = existing.meta.resource_version;
                self.cluster.update_workload(desired).await?;
                debug!(workload = %name, "Workload updated");
                Ok(Upserted::Applied)
            }
            Err(e) if e.is_not_found() && destroy => {
                debug!(workload = %name, "Nothing to destroy");
                Ok(Upserted::AlreadyRemoved)
            }
            Err(e) if e.is_not_found() => {
                self.cluster.create_workload(desired).await?;
                debug!(workload = %name, "Workload created");
                Ok(Upserted::Applied)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a waiting service from its workload's observed state
    async fn check(&self, namespace: &str, slug: &str, service: &mut Service) {
        let name = naming::workload_name(slug, &service.name);
        match self.cluster.get_workload(namespace, &name).await {
            Ok(workload) if rollout_complete(&workload) => {
                info!(workload = %name, replicas = workload.spec.replicas, "Rollout complete");
                service.resolve(State::Complete, "");
            }
            Ok(workload) => {
                if let Some(reason) = self.fatal_reason(namespace, &workload).await {
                    warn!(workload = %name, reason = %reason, "Rollout cannot progress");
                    service.resolve(State::Failed, format!("{}: {}", name, reason));
                }
            }
            Err(e) if e.is_not_found() => {
                service.resolve(State::Failed, ReconcileError::from(e).to_string());
            }
            Err(e) => {
                warn!(workload = %name, error = %e, "Status check failed, retrying");
            }
        }
    }

    async fn fatal_reason(&self, namespace: &str, workload: &Workload) -> Option<String> {
        let pods = match self.cluster.list_pods(namespace, &workload.spec.selector).await {
            Ok(pods) => pods,
            Err(e) => {
                debug!(workload = %workload.meta.name, error = %e, "Pod listing failed");
                return None;
            }
        };
        pods.into_iter()
            .filter_map(|pod| pod.waiting_reason)
            .find(|reason| FATAL_WAITING_REASONS.contains(&reason.as_str()))
    }

    /// Remove managed workloads no current service maps to. Best effort:
    /// failures are logged and never change the reported outcome.
    async fn cleanup_orphans(&self, namespace: &str, deploy: &DeployPayload) {
        let desired: HashSet<String> = deploy
            .services
            .iter()
            .map(|s| naming::workload_name(&deploy.project.slug, &s.name))
            .collect();

        let workloads = match self
            .cluster
            .list_workloads(namespace, &naming::managed_selector())
            .await
        {
            Ok(workloads) => workloads,
            Err(e) => {
                let e = ReconcileError::Cleanup(e.to_string());
                warn!(namespace = %namespace, error = %e, "Orphan listing failed");
                return;
            }
        };

        for orphan in workloads
            .iter()
            .filter(|w| !desired.contains(&w.meta.name))
        {
            match self.delete_cascade(namespace, orphan).await {
                Ok(()) => info!(namespace = %namespace, workload = %orphan.meta.name, "Orphan removed"),
                Err(e) => warn!(namespace = %namespace, workload = %orphan.meta.name, error = %e, "Orphan cleanup failed"),
            }
        }
    }

    /// Workload, then its replica sets, then their pods
    async fn delete_cascade(&self, namespace: &str, workload: &Workload) -> Result<()> {
        let cleanup = |e: keel_cluster::ClusterError| {
            ReconcileError::Cleanup(format!("{}: {}", workload.meta.name, e))
        };
        let selector = &workload.spec.selector;

        self.cluster
            .delete_workload(namespace, &workload.meta.name)
            .await
            .map_err(cleanup)?;

        for rs in self
            .cluster
            .list_replica_sets(namespace, selector)
            .await
            .map_err(cleanup)?
        {
            match self.cluster.delete_replica_set(namespace, &rs.meta.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(cleanup(e)),
            }
        }

        for pod in self
            .cluster
            .list_pods(namespace, selector)
            .await
            .map_err(cleanup)?
        {
            match self.cluster.delete_pod(namespace, &pod.meta.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(cleanup(e)),
            }
        }
        Ok(())
    }
}

fn failure_message(deploy: &DeployPayload, budget_secs: u64) -> String {
    let failed: Vec<&str> = deploy
        .services
        .iter()
        .filter(|s| s.state == State::Failed)
        .map(|s| s.name.as_str())
        .collect();
    if !failed.is_empty() {
        return format!(
            "{} of {} services failed: {}",
            failed.len(),
            deploy.services.len(),
            failed.join(", ")
        );
    }
    let waiting: Vec<&str> = deploy
        .services
        .iter()
        .filter(|s| s.state == State::Waiting)
        .map(|s| s.name.as_str())
        .collect();
    ReconcileError::Timeout(format!(
        "rollout of {} did not finish within {}s",
        waiting.join(", "),
        budget_secs
    ))
    .to_string()
}

#[async_trait]
impl Reconciler for DeploymentReconciler {
    async fn start(&self, sink: EventSink) -> keel_core::Result<()> {
        self.cluster
            .check()
            .await
            .map_err(|e| keel_core::Error::configuration(Self::NAME, e.to_string()))?;
        self.sink
            .set(sink)
            .map_err(|_| keel_core::Error::configuration(Self::NAME, "already started"))?;
        info!(reconciler = Self::NAME, "Deployment reconciler ready");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    fn subscriptions(&self) -> HashSet<String> {
        [Action::Create, Action::Update, Action::Destroy]
            .into_iter()
            .map(|action| event_name(PayloadKind::Deploy, Some(action)))
            .collect()
    }

    async fn process(&self, event: Event) -> keel_core::Result<()> {
        match event.payload() {
            Payload::Deploy(deploy) if deploy.action == Action::Status => Ok(()),
            Payload::Deploy(deploy) => self.reconcile(&event, deploy).await,
            other => Err(ReconcileError::UnexpectedPayload(other.kind().to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests;
