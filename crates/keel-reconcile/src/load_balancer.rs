//! Load-balancer reconciler
//!
//! Converges one exposure object per expose command. Internal exposures
//! resolve to `<name>.<namespace>` straight away; cloud exposures wait for
//! the provider to assign a hostname. Every command yields exactly one
//! terminal status.

use crate::config::KubernetesConfig;
use crate::error::{ReconcileError, Result};
use crate::manifest;
use crate::naming;
use crate::ops;
use crate::poll::{PollTick, Poller};
use crate::status::report_expose;
use async_trait::async_trait;
use keel_cluster::{ClusterApi, ClusterService, ObjectMeta, ServicePort, ServiceSpec, ServiceType};
use keel_core::{
    event_name, Action, Event, EventSink, ExposePayload, ExposeType, Payload, PayloadKind,
    Protocol, Reconciler, State,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ANNOTATION_PREFIX: &str = "service.beta.kubernetes.io/";

/// Seconds in-flight connections get when a backend leaves the pool
pub const CONNECTION_DRAINING_TIMEOUT_SECS: u32 = 300;

/// Minutes between access-log deliveries
const ACCESS_LOG_EMIT_INTERVAL_MINS: u32 = 5;

fn annotation(key: &str) -> String {
    format!("{}{}", ANNOTATION_PREFIX, key)
}

/// Cloud load-balancer annotations for an exposure
#[must_use]
pub fn annotations(expose: &ExposePayload, config: &KubernetesConfig) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if !expose.kind.is_cloud() {
        return out;
    }

    out.insert(
        annotation("aws-load-balancer-cross-zone-load-balancing-enabled"),
        "true".to_string(),
    );
    out.insert(
        annotation("aws-load-balancer-connection-draining-enabled"),
        "true".to_string(),
    );
    out.insert(
        annotation("aws-load-balancer-connection-draining-timeout"),
        CONNECTION_DRAINING_TIMEOUT_SECS.to_string(),
    );

    if !config.access_log_bucket.is_empty() {
        out.insert(annotation("aws-load-balancer-access-log-enabled"), "true".to_string());
        out.insert(
            annotation("aws-load-balancer-access-log-emit-interval"),
            ACCESS_LOG_EMIT_INTERVAL_MINS.to_string(),
        );
        out.insert(
            annotation("aws-load-balancer-access-log-s3-bucket-name"),
            config.access_log_bucket.clone(),
        );
        out.insert(
            annotation("aws-load-balancer-access-log-s3-bucket-prefix"),
            config.access_log_prefix.clone(),
        );
    }

    let backend = expose
        .listener_pairs
        .iter()
        .map(|pair| pair.destination.protocol)
        .find(|p| matches!(p, Protocol::Http | Protocol::Https | Protocol::Ssl));
    if let Some(protocol) = backend {
        out.insert(
            annotation("aws-load-balancer-backend-protocol"),
            protocol.as_str().to_ascii_lowercase(),
        );
    }

    let ssl_ports: Vec<String> = expose
        .listener_pairs
        .iter()
        .filter(|pair| pair.destination.protocol.is_tls())
        .map(|pair| pair.source.port.to_string())
        .collect();
    if !ssl_ports.is_empty() {
        out.insert(annotation("aws-load-balancer-ssl-ports"), ssl_ports.join(","));
        out.insert(
            annotation("aws-load-balancer-ssl-cert"),
            config.ssl_cert_arn.clone(),
        );
    }
    out
}

/// Desired exposure object
#[must_use]
pub fn exposure(namespace: &str, expose: &ExposePayload, config: &KubernetesConfig) -> ClusterService {
    let workload = naming::workload_name(&expose.project.slug, &expose.service.name);
    let mut meta = ObjectMeta::new(namespace, naming::dns_label(&expose.name))
        .with_label(naming::MANAGED_BY_LABEL, naming::MANAGER)
        .with_label(naming::PROJECT_LABEL, naming::dns_label(&expose.project.slug))
        .with_label(naming::SERVICE_LABEL, naming::dns_label(&expose.service.name));
    meta.annotations = annotations(expose, config);

    let ports = expose
        .listener_pairs
        .iter()
        .map(|pair| ServicePort {
            name: format!(
                "{}-{}",
                pair.source.protocol.as_str().to_ascii_lowercase(),
                pair.source.port
            ),
            port: pair.source.port,
            target_port: pair.destination.port,
            protocol: manifest::transport(pair.destination.protocol),
        })
        .collect();

    ClusterService {
        meta,
        spec: ServiceSpec {
            kind: if expose.kind.is_cloud() {
                ServiceType::LoadBalancer
            } else {
                ServiceType::ClusterIp
            },
            selector: naming::app_selector(&workload),
            ports,
            cluster_ip: None,
            load_balancer_source_ranges: match expose.kind {
                ExposeType::Office => config.office_source_ranges.clone(),
                _ => Vec::new(),
            },
        },
        status: Default::default(),
    }
}

/// Handles `Expose:create`, `Expose:update` and `Expose:destroy`
pub struct LoadBalancerReconciler {
    cluster: Arc<dyn ClusterApi>,
    config: KubernetesConfig,
    sink: OnceLock<EventSink>,
    cancel: CancellationToken,
}

impl LoadBalancerReconciler {
    /// Registry name
    pub const NAME: &'static str = "load_balancers";

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

    fn namespace(&self, expose: &ExposePayload) -> String {
        naming::namespace_name(
            self.config.environment_for(&expose.environment),
            &expose.project.slug,
        )
    }

    /// Create or update the exposure and report its address
    pub async fn apply(&self, command: &Event, expose: &ExposePayload) -> keel_core::Result<()> {
        let sink = self.sink()?;
        let namespace = self.namespace(expose);
        info!(
            name = %expose.name,
            namespace = %namespace,
            kind = %expose.kind.as_str(),
            ports = expose.listener_pairs.len(),
            "Expose started"
        );

        match self.converge(&namespace, expose).await {
            Ok(dns) => report_expose(sink, command, expose, State::Complete, &dns, "").await,
            Err(e) => {
                warn!(name = %expose.name, namespace = %namespace, error = %e, "Expose failed");
                report_expose(sink, command, expose, State::Failed, "", e.to_string()).await
            }
        }
    }

    async fn converge(&self, namespace: &str, expose: &ExposePayload) -> Result<String> {
        ops::ensure_namespace(self.cluster.as_ref(), namespace).await?;

        let desired = exposure(namespace, expose, &self.config);
        let name = desired.meta.name.clone();
        self.upsert(desired).await?;

        if !expose.kind.is_cloud() {
            return Ok(format!("{}.{}", name, namespace));
        }
        self.await_hostname(namespace, &name).await
    }

    async fn upsert(&self, mut desired: ClusterService) -> Result<()> {
        let (namespace, name) = (desired.meta.namespace.clone(), desired.meta.name.clone());
        match self.cluster.get_service(&namespace, &name).await {
            Ok(existing) => {
                desired.meta.resource_version = existing.meta.resource_version;
                desired.spec.cluster_ip = existing.spec.cluster_ip;
                self.cluster.update_service(desired).await?;
                debug!(service = %name, "Exposure updated");
            }
            Err(e) if e.is_not_found() => {
                self.cluster.create_service(desired).await?;
                debug!(service = %name, "Exposure created");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn await_hostname(&self, namespace: &str, name: &str) -> Result<String> {
        let budget = self.config.load_balancer_timeout();
        let mut poller = Poller::new(self.config.poll_interval(), budget, self.cancel.child_token());
        loop {
            match poller.tick().await {
                PollTick::Check => {}
                PollTick::Expired => {
                    return Err(ReconcileError::Timeout(format!(
                        "no address assigned to {} within {}s",
                        name,
                        budget.as_secs()
                    )))
                }
                PollTick::Cancelled => return Err(ReconcileError::Cancelled),
            }

            match self.cluster.get_service(namespace, name).await {
                Ok(service) => match service.status.ingress_hostname {
                    Some(hostname) if !hostname.is_empty() => {
                        info!(service = %name, hostname = %hostname, "Address assigned");
                        return Ok(hostname);
                    }
                    _ => debug!(service = %name, "Waiting for address"),
                },
                Err(e) if e.is_not_found() => return Err(e.into()),
                Err(e) => warn!(service = %name, error = %e, "Status check failed, retrying"),
            }
        }
    }

    /// Delete the exposure and report `deleted`
    pub async fn delete(&self, command: &Event, expose: &ExposePayload) -> keel_core::Result<()> {
        let sink = self.sink()?;
        let namespace = self.namespace(expose);
        let name = naming::dns_label(&expose.name);

        let outcome = match self.cluster.get_service(&namespace, &name).await {
            Ok(_) => self
                .cluster
                .delete_service(&namespace, &name)
                .await
                .map_err(ReconcileError::from),
            Err(e) => Err(ReconcileError::from(e)),
        };

        match outcome {
            Ok(()) => report_expose(sink, command, expose, State::Deleted, "", "").await,
            Err(e) => {
                warn!(name = %name, namespace = %namespace, error = %e, "Expose teardown failed");
                report_expose(sink, command, expose, State::Failed, "", e.to_string()).await
            }
        }
    }
}

#[async_trait]
impl Reconciler for LoadBalancerReconciler {
    async fn start(&self, sink: EventSink) -> keel_core::Result<()> {
        self.cluster
            .check()
            .await
            .map_err(|e| keel_core::Error::configuration(Self::NAME, e.to_string()))?;
        self.sink
            .set(sink)
            .map_err(|_| keel_core::Error::configuration(Self::NAME, "already started"))?;
        info!(reconciler = Self::NAME, "Load-balancer reconciler ready");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }

    fn subscriptions(&self) -> HashSet<String> {
        [Action::Create, Action::Update, Action::Destroy]
            .into_iter()
            .map(|action| event_name(PayloadKind::Expose, Some(action)))
            .collect()
    }

    async fn process(&self, event: Event) -> keel_core::Result<()> {
        match event.payload() {
            Payload::Expose(expose) => match expose.action {
                Action::Status => Ok(()),
                Action::Destroy => self.delete(&event, expose).await,
                Action::Create | Action::Update => self.apply(&event, expose).await,
            },
            other => Err(ReconcileError::UnexpectedPayload(other.kind().to_string()).into()),
        }
    }
}
