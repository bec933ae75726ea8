//! Desired-state objects built from a deploy command

use crate::config::RegistryConfig;
use crate::naming;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keel_cluster::{
    Container, ContainerPort, DeploymentStrategy, EnvVar, KeyToPath, Namespace, ObjectMeta,
    PodTemplate, Probe, ProbeHandler, ResourceRequirements, Secret, SecretType,
    TransportProtocol, Volume, VolumeMount, Workload, WorkloadSpec, WorkloadStatus,
};
use keel_core::{Action, Protocol, SecretEntry, SecretKind, Service};
use std::collections::BTreeMap;

/// Where file secrets are mounted
pub const SECRETS_MOUNT_PATH: &str = "/etc/secrets";

const SECRETS_VOLUME: &str = "secrets";

/// Key of the registry credentials in a pull secret
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Map a listener protocol onto the transport the cluster sees
#[must_use]
pub fn transport(protocol: Protocol) -> TransportProtocol {
    match protocol.transport() {
        Protocol::Udp => TransportProtocol::Udp,
        _ => TransportProtocol::Tcp,
    }
}

/// Namespace object
#[must_use]
pub fn namespace(name: &str) -> Namespace {
    Namespace {
        meta: ObjectMeta::new("", name).with_label(naming::MANAGED_BY_LABEL, naming::MANAGER),
    }
}

/// `.dockerconfigjson` pull secret for the configured registry
#[must_use]
pub fn pull_secret(namespace: &str, registry: &RegistryConfig) -> Secret {
    let auth = BASE64.encode(format!("{}:{}", registry.username, registry.password));
    let config = serde_json::json!({
        "auths": {
            registry.host.as_str(): {
                "username": registry.username,
                "password": registry.password,
                "email": registry.email,
                "auth": auth,
            }
        }
    });

    let mut data = BTreeMap::new();
    data.insert(DOCKER_CONFIG_KEY.to_string(), config.to_string());
    Secret {
        meta: ObjectMeta::new(namespace, registry.secret_name.as_str())
            .with_label(naming::MANAGED_BY_LABEL, naming::MANAGER),
        kind: SecretType::DockerConfigJson,
        data,
    }
}

/// One reconciliation's secrets and how containers consume them
#[derive(Debug, Clone)]
pub struct SecretBundle {
    /// Secret object to create
    pub secret: Secret,
    /// Environment entries referencing the secret
    pub env: Vec<EnvVar>,
    /// Volume projecting file entries, if any
    pub volume: Option<Volume>,
}

impl SecretBundle {
    /// Build a fresh bundle; `None` when there are no secrets
    #[must_use]
    pub fn build(namespace: &str, slug: &str, entries: &[SecretEntry]) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        let name = naming::secret_bundle_name(slug);

        let mut data = BTreeMap::new();
        let mut env = Vec::new();
        let mut files = Vec::new();
        for entry in entries {
            data.insert(entry.key.clone(), entry.value.clone());
            match entry.kind {
                SecretKind::Env | SecretKind::ProtectedEnv => env.push(EnvVar {
                    name: entry.key.clone(),
                    secret_name: name.clone(),
                    secret_key: entry.key.clone(),
                }),
                SecretKind::File => files.push(KeyToPath {
                    key: entry.key.clone(),
                    path: entry.key.clone(),
                }),
            }
        }

        let volume = (!files.is_empty()).then(|| Volume {
            name: SECRETS_VOLUME.to_string(),
            secret_name: name.clone(),
            items: files,
        });

        Some(Self {
            secret: Secret {
                meta: ObjectMeta::new(namespace, name)
                    .with_label(naming::MANAGED_BY_LABEL, naming::MANAGER)
                    .with_label(naming::PROJECT_LABEL, naming::dns_label(slug)),
                kind: SecretType::Opaque,
                data,
            },
            env,
            volume,
        })
    }

    /// Name of the secret object
    #[must_use]
    pub fn name(&self) -> &str {
        &self.secret.meta.name
    }
}

/// Inputs shared by every workload of one deploy command
#[derive(Debug, Clone, Copy)]
pub struct WorkloadContext<'a> {
    /// Target namespace
    pub namespace: &'a str,
    /// Project slug
    pub slug: &'a str,
    /// Image for every container
    pub image: &'a str,
    /// Command-level action
    pub action: Action,
    /// Node placement
    pub node_selector: &'a BTreeMap<String, String>,
    /// Pull secret name, when one is managed
    pub pull_secret: Option<&'a str>,
    /// This pass's secrets
    pub secrets: Option<&'a SecretBundle>,
}

fn tcp_probe(port: i32) -> Probe {
    Probe {
        handler: ProbeHandler::TcpSocket { port },
        initial_delay_seconds: 5,
        period_seconds: 10,
    }
}

fn exec_probe() -> Probe {
    Probe {
        handler: ProbeHandler::Exec {
            command: vec!["/bin/true".to_string()],
        },
        initial_delay_seconds: 5,
        period_seconds: 10,
    }
}

/// Readiness and liveness probes; one-shot services get none
#[must_use]
pub fn probes(service: &Service) -> Option<(Probe, Probe)> {
    if service.one_shot {
        return None;
    }
    Some(match service.tcp_listener() {
        Some(listener) => (tcp_probe(listener.port), tcp_probe(listener.port)),
        None => (exec_probe(), exec_probe()),
    })
}

/// Rolling updates need a socket health check to be safe
#[must_use]
pub fn strategy(service: &Service) -> DeploymentStrategy {
    if !service.one_shot && service.tcp_listener().is_some() {
        DeploymentStrategy::RollingUpdate {
            max_surge: "30%".to_string(),
            max_unavailable: "10%".to_string(),
        }
    } else {
        DeploymentStrategy::Recreate
    }
}

fn quantities(pairs: [(&str, &Option<String>); 2]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .filter(|v| !v.is_empty())
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect()
}

fn resources(service: &Service) -> ResourceRequirements {
    let spec = &service.resource_spec;
    ResourceRequirements {
        requests: quantities([("cpu", &spec.cpu_request), ("memory", &spec.mem_request)]),
        limits: quantities([("cpu", &spec.cpu_limit), ("memory", &spec.mem_limit)]),
    }
}

/// Workload for one service
#[must_use]
pub fn workload(ctx: &WorkloadContext<'_>, service: &Service) -> Workload {
    let name = naming::workload_name(ctx.slug, &service.name);
    let labels = naming::workload_labels(ctx.slug, &service.name);
    let probes = probes(service);

    let mut container = Container {
        name: naming::dns_label(&service.name),
        image: ctx.image.to_string(),
        command: service.command.clone(),
        ports: service
            .listeners
            .iter()
            .map(|l| ContainerPort {
                container_port: l.port,
                protocol: transport(l.protocol),
            })
            .collect(),
        readiness_probe: probes.as_ref().map(|(r, _)| r.clone()),
        liveness_probe: probes.map(|(_, l)| l),
        resources: resources(service),
        ..Default::default()
    };

    let mut volumes = Vec::new();
    if let Some(bundle) = ctx.secrets {
        container.env = bundle.env.clone();
        if let Some(volume) = &bundle.volume {
            container.volume_mounts.push(VolumeMount {
                name: volume.name.clone(),
                mount_path: SECRETS_MOUNT_PATH.to_string(),
                read_only: true,
            });
            volumes.push(volume.clone());
        }
    }

    let mut meta = ObjectMeta::new(ctx.namespace, name.clone());
    meta.labels = labels.clone();

    Workload {
        meta,
        spec: WorkloadSpec {
            replicas: service.desired_replicas(ctx.action),
            selector: naming::app_selector(&name),
            strategy: strategy(service),
            template: PodTemplate {
                labels,
                containers: vec![container],
                volumes,
                node_selector: ctx.node_selector.clone(),
                image_pull_secrets: ctx.pull_secret.map(str::to_string).into_iter().collect(),
                termination_grace_period_seconds: service.resource_spec.termination_grace_seconds,
            },
        },
        status: WorkloadStatus::default(),
    }
}
