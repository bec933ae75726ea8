//! Command and status payloads carried by events.
//!
//! The wire format is camelCase JSON, matching what external producers
//! (git sync, release promotion, API handlers) publish.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a command asks for, or `Status` for reconciler reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create the target
    Create,
    /// Update the target in place
    Update,
    /// Tear the target down
    Destroy,
    /// Progress or outcome report
    Status,
}

impl Action {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::Status => "status",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a command or of a single service within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Not yet resolved
    #[default]
    Waiting,
    /// Reconciliation in progress
    Running,
    /// Converged
    Complete,
    /// Torn down
    Deleted,
    /// Gave up
    Failed,
}

impl State {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }

    /// Terminal states end a command's status stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Deleted | Self::Failed)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Network protocol of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Raw TCP
    #[default]
    Tcp,
    /// Raw UDP
    Udp,
    /// Plain HTTP
    Http,
    /// HTTP over TLS
    Https,
    /// TLS-wrapped TCP
    Ssl,
}

impl Protocol {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Ssl => "SSL",
        }
    }

    /// Transport protocol the cluster sees. HTTP-family collapses to TCP.
    #[must_use]
    pub fn transport(&self) -> Protocol {
        match self {
            Self::Udp => Self::Udp,
            _ => Self::Tcp,
        }
    }

    /// Whether TLS is terminated in front of this listener
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Https | Self::Ssl)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Project reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    /// URL-safe project identifier
    pub slug: String,
}

/// Release commit range
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Release {
    /// Commit being deployed
    #[serde(default)]
    pub head: String,
    /// Previously deployed commit
    #[serde(default)]
    pub tail: String,
}

/// A port a service listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Container port
    pub port: i32,
    /// Protocol spoken on the port
    #[serde(default)]
    pub protocol: Protocol,
}

/// Resource requests and limits, as cluster quantity strings ("250m", "512Mi").
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU request
    #[serde(default)]
    pub cpu_request: Option<String>,
    /// CPU limit
    #[serde(default)]
    pub cpu_limit: Option<String>,
    /// Memory request
    #[serde(default)]
    pub mem_request: Option<String>,
    /// Memory limit
    #[serde(default)]
    pub mem_limit: Option<String>,
    /// Seconds a container gets between SIGTERM and SIGKILL
    #[serde(default)]
    pub termination_grace_seconds: Option<i64>,
}

/// One service of a deploy command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service name, unique within the project
    pub name: String,
    /// Container command; empty keeps the image entrypoint
    #[serde(default)]
    pub command: Vec<String>,
    /// Ports the service listens on
    #[serde(default)]
    pub listeners: Vec<Listener>,
    /// Desired replica count
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Per-service action
    #[serde(default = "default_service_action")]
    pub action: Action,
    /// Runs to completion instead of serving
    #[serde(default)]
    pub one_shot: bool,
    /// Resolution state within the current pass
    #[serde(default)]
    pub state: State,
    /// Human-readable reason for `state`
    #[serde(default)]
    pub state_message: String,
    /// Requests and limits
    #[serde(default)]
    pub resource_spec: ResourceSpec,
}

fn default_replicas() -> i32 {
    1
}

fn default_service_action() -> Action {
    Action::Update
}

impl Service {
    /// Create a service with one replica and no listeners
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Vec::new(),
            listeners: Vec::new(),
            replicas: default_replicas(),
            action: default_service_action(),
            one_shot: false,
            state: State::Waiting,
            state_message: String::new(),
            resource_spec: ResourceSpec::default(),
        }
    }

    /// Add a listener
    #[must_use]
    pub fn with_listener(mut self, port: i32, protocol: Protocol) -> Self {
        self.listeners.push(Listener { port, protocol });
        self
    }

    /// Set the replica count
    #[must_use]
    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the per-service action
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// First listener the cluster can health-check over a TCP socket
    #[must_use]
    pub fn tcp_listener(&self) -> Option<&Listener> {
        self.listeners
            .iter()
            .find(|l| l.protocol.transport() == Protocol::Tcp)
    }

    /// Whether the service or its command asks for teardown
    #[must_use]
    pub fn is_destroy(&self, command_action: Action) -> bool {
        self.action == Action::Destroy || command_action == Action::Destroy
    }

    /// Replica count to converge to under the given command action
    #[must_use]
    pub fn desired_replicas(&self, command_action: Action) -> i32 {
        if self.is_destroy(command_action) {
            0
        } else {
            self.replicas
        }
    }

    /// Set state and message together
    pub fn resolve(&mut self, state: State, message: impl Into<String>) {
        self.state = state;
        self.state_message = message.into();
    }
}

/// How a secret entry is materialised in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretKind {
    /// Environment variable
    Env,
    /// File under the secrets mount
    File,
    /// Environment variable whose value is never echoed back
    ProtectedEnv,
}

/// A single secret value for a deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    /// Variable name or file name
    pub key: String,
    /// Plain value
    pub value: String,
    /// Materialisation kind
    #[serde(alias = "type")]
    pub kind: SecretKind,
}

impl SecretEntry {
    /// Create a secret entry
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: SecretKind) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
        }
    }
}

/// Deploy command (and its status reports)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
    /// Command action
    pub action: Action,
    /// Overall state
    #[serde(default)]
    pub state: State,
    /// Human-readable reason for `state`
    #[serde(default)]
    pub state_message: String,
    /// Owning project
    pub project: Project,
    /// Release being deployed
    #[serde(default)]
    pub release: Release,
    /// Container image reference
    pub image: String,
    /// Desired services
    #[serde(default)]
    pub services: Vec<Service>,
    /// Secrets materialised for every service
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
    /// Rollout timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Target environment name
    pub environment: String,
}

impl DeployPayload {
    /// Create a deploy command
    #[must_use]
    pub fn new(
        action: Action,
        slug: impl Into<String>,
        environment: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            action,
            state: State::Waiting,
            state_message: String::new(),
            project: Project { slug: slug.into() },
            release: Release::default(),
            image: image.into(),
            services: Vec::new(),
            secrets: Vec::new(),
            timeout: None,
            environment: environment.into(),
        }
    }

    /// Add a service
    #[must_use]
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Add a secret
    #[must_use]
    pub fn with_secret(mut self, secret: SecretEntry) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Set the timeout in seconds
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Rollout budget, falling back to `default` when unset or zero
    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default,
        }
    }

    /// Status report derived from this command. Secret values never
    /// travel on status events.
    #[must_use]
    pub fn status(&self, state: State, message: impl Into<String>) -> Self {
        let mut report = self.clone();
        report.secrets.clear();
        report.action = Action::Status;
        report.state = state;
        report.state_message = message.into();
        report
    }
}

/// Kind of network exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposeType {
    /// Cluster-local virtual IP
    Internal,
    /// Public cloud load balancer
    External,
    /// Cloud load balancer restricted to office source ranges
    Office,
}

impl ExposeType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Office => "office",
        }
    }

    /// Whether a cloud provider must assign the address
    #[must_use]
    pub fn is_cloud(&self) -> bool {
        !matches!(self, Self::Internal)
    }
}

/// Service being exposed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceRef {
    /// Service name within the project
    pub name: String,
}

/// Public-facing port mapped onto a container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerPair {
    /// Port clients connect to
    pub source: Listener,
    /// Port the service listens on
    pub destination: Listener,
}

/// Expose command (and its status report)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposePayload {
    /// Command action
    pub action: Action,
    /// Overall state
    #[serde(default)]
    pub state: State,
    /// Exposure kind
    #[serde(rename = "type")]
    pub kind: ExposeType,
    /// Exposure object name, chosen by the caller
    pub name: String,
    /// Owning project
    pub project: Project,
    /// Service behind the exposure
    pub service: ServiceRef,
    /// Port mappings
    #[serde(default)]
    pub listener_pairs: Vec<ListenerPair>,
    /// Target environment name
    pub environment: String,
    /// Resolved address
    #[serde(default)]
    pub dns: String,
    /// Human-readable reason for `state`
    #[serde(default)]
    pub state_message: String,
}

impl ExposePayload {
    /// Create an expose command
    #[must_use]
    pub fn new(
        action: Action,
        kind: ExposeType,
        name: impl Into<String>,
        slug: impl Into<String>,
        service: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            action,
            state: State::Waiting,
            kind,
            name: name.into(),
            project: Project { slug: slug.into() },
            service: ServiceRef {
                name: service.into(),
            },
            listener_pairs: Vec::new(),
            environment: environment.into(),
            dns: String::new(),
            state_message: String::new(),
        }
    }

    /// Add a port mapping
    #[must_use]
    pub fn with_pair(mut self, source: Listener, destination: Listener) -> Self {
        self.listener_pairs.push(ListenerPair {
            source,
            destination,
        });
        self
    }

    /// Status report derived from this command
    #[must_use]
    pub fn status(&self, state: State, dns: impl Into<String>, message: impl Into<String>) -> Self {
        let mut report = self.clone();
        report.action = Action::Status;
        report.state = state;
        report.dns = dns.into();
        report.state_message = message.into();
        report
    }
}

/// Payload kind, the first half of every event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Workload deployment
    Deploy,
    /// Network exposure
    Expose,
}

impl PayloadKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "Deploy",
            Self::Expose => "Expose",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of payloads the bus routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Payload {
    /// Deploy command or status
    Deploy(DeployPayload),
    /// Expose command or status
    Expose(ExposePayload),
}

impl Payload {
    /// Kind of this payload
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Deploy(_) => PayloadKind::Deploy,
            Self::Expose(_) => PayloadKind::Expose,
        }
    }

    /// Action carried by the payload, if it has one
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Deploy(p) => Some(p.action),
            Self::Expose(p) => Some(p.action),
        }
    }

    /// Overall state carried by the payload
    #[must_use]
    pub fn state(&self) -> State {
        match self {
            Self::Deploy(p) => p.state,
            Self::Expose(p) => p.state,
        }
    }
}

impl From<DeployPayload> for Payload {
    fn from(p: DeployPayload) -> Self {
        Self::Deploy(p)
    }
}

impl From<ExposePayload> for Payload {
    fn from(p: ExposePayload) -> Self {
        Self::Expose(p)
    }
}

#[cfg(test)]
mod tests;
