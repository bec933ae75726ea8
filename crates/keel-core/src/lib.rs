//! Keel Core - command bus for the delivery engine
//!
//! This crate provides:
//! - Event: immutable typed messages with causation links
//! - Payload: the closed set of Deploy and Expose command/status payloads
//! - Registry: named reconciler factories built at startup
//! - Bus: bounded publish queue and dispatch loop (inline or queued)
//! - Queue: in-memory and Redis work queues with worker pools and retries
//! - Shutdown: cooperative, drain-bounded shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod error;
pub mod event;
pub mod payload;
pub mod queue;
pub mod registry;
pub mod shutdown;

pub use bus::{BusConfig, DispatchMode, EventBus, EventSink};
pub use error::{Error, Result};
pub use event::{event_name, Event};
pub use payload::{
    Action, DeployPayload, ExposePayload, ExposeType, Listener, ListenerPair, Payload,
    PayloadKind, Project, Protocol, Release, ResourceSpec, SecretEntry, SecretKind, Service,
    ServiceRef, State,
};
pub use queue::{MemoryWorkQueue, RedisWorkQueue, WorkQueue};
pub use registry::{PluginRegistry, Reconciler, ReconcilerFactory, WorkerOptions};
pub use shutdown::{wait_for_shutdown_signal, ShutdownController, ShutdownPhase, TaskGuard};
