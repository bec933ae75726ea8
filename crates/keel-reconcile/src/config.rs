//! Cluster settings read by both reconcilers at start

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cluster backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBackend {
    /// In-process control plane
    #[default]
    Memory,
    /// Kubernetes API server at `api_endpoint`
    Kubernetes,
}

/// Image registry pull credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. `registry.example.com`
    #[serde(default)]
    pub host: String,
    /// Login
    #[serde(default)]
    pub username: String,
    /// Password or token
    #[serde(default)]
    pub password: String,
    /// Account email
    #[serde(default)]
    pub email: String,
    /// Name of the pull secret in each namespace
    #[serde(default = "default_pull_secret_name")]
    pub secret_name: String,
}

fn default_pull_secret_name() -> String {
    "keel-registry".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            email: String::new(),
            secret_name: default_pull_secret_name(),
        }
    }
}

/// `[kubernetes]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Control-plane implementation
    #[serde(default)]
    pub backend: ClusterBackend,
    /// API server URL; empty uses the local kubeconfig or in-cluster account
    #[serde(default)]
    pub api_endpoint: String,
    /// Bearer token; empty keeps whatever credentials the endpoint resolves to
    #[serde(default)]
    pub token: String,
    /// Replaces the environment carried by commands when set
    #[serde(default)]
    pub environment: Option<String>,
    /// Node labels every pod must be scheduled onto
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Certificate for SSL-terminating load balancers
    #[serde(default)]
    pub ssl_cert_arn: String,
    /// Bucket receiving load-balancer access logs; empty disables them
    #[serde(default)]
    pub access_log_bucket: String,
    /// Key prefix within the access-log bucket
    #[serde(default)]
    pub access_log_prefix: String,
    /// Client CIDRs allowed through `office` load balancers
    #[serde(default)]
    pub office_source_ranges: Vec<String>,
    /// Default rollout budget when a command carries none
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,
    /// Budget for cloud address assignment
    #[serde(default = "default_load_balancer_timeout_secs")]
    pub load_balancer_timeout_secs: u64,
    /// Interval between status checks
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Pull credentials; no pull secret is managed when absent
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

fn default_deploy_timeout_secs() -> u64 {
    600
}

fn default_load_balancer_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::default(),
            api_endpoint: String::new(),
            token: String::new(),
            environment: None,
            node_selector: BTreeMap::new(),
            ssl_cert_arn: String::new(),
            access_log_bucket: String::new(),
            access_log_prefix: String::new(),
            office_source_ranges: Vec::new(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            load_balancer_timeout_secs: default_load_balancer_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            registry: None,
        }
    }
}

impl KubernetesConfig {
    /// Environment to deploy into: the override if set, else the command's
    #[must_use]
    pub fn environment_for<'a>(&'a self, requested: &'a str) -> &'a str {
        match self.environment.as_deref() {
            Some(env) if !env.is_empty() => env,
            _ => requested,
        }
    }

    /// Default rollout budget
    #[must_use]
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    /// Address assignment budget
    #[must_use]
    pub fn load_balancer_timeout(&self) -> Duration {
        Duration::from_secs(self.load_balancer_timeout_secs)
    }

    /// Poll interval (at least one second)
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Registry credentials, if a registry host is configured
    #[must_use]
    pub fn registry(&self) -> Option<&RegistryConfig> {
        self.registry.as_ref().filter(|r| !r.host.is_empty())
    }
}
