//! Registry - reconciler registration before startup
//!
//! The registry is an explicit object built at startup and handed to the
//! [`EventBus`](crate::bus::EventBus). Each entry pairs a factory with the
//! worker options used in queued mode.

use crate::bus::EventSink;
use crate::error::{Error, Result};
use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A worker that converges external state in response to events.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Called once before any event is delivered. The sink is used to
    /// publish status events. An error here is fatal to the bus.
    async fn start(&self, sink: EventSink) -> Result<()>;

    /// Called once during shutdown, after in-flight work drained.
    async fn stop(&self);

    /// Event names or payload kinds this reconciler wants.
    fn subscriptions(&self) -> HashSet<String>;

    /// Handle one event.
    async fn process(&self, event: Event) -> Result<()>;
}

/// Builds a reconciler instance at bus start
pub type ReconcilerFactory = Box<dyn Fn() -> Arc<dyn Reconciler> + Send + Sync>;

/// Per-reconciler delivery options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Whether the reconciler is started at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Concurrent jobs in queued mode
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Extra attempts after a processing error in queued mode
    #[serde(default)]
    pub retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_workers(),
            retries: 0,
        }
    }
}

impl WorkerOptions {
    /// Set the worker count (at least one)
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the retry count
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set enabled status
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

struct RegistryEntry {
    factory: ReconcilerFactory,
    options: WorkerOptions,
}

/// A started reconciler together with its registry metadata
pub(crate) struct Instance {
    pub(crate) name: String,
    pub(crate) options: WorkerOptions,
    pub(crate) reconciler: Arc<dyn Reconciler>,
}

/// Named reconciler factories
#[derive(Default)]
pub struct PluginRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reconciler with default options
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn Reconciler> + Send + Sync + 'static,
    {
        self.register_with(name, WorkerOptions::default(), factory)
    }

    /// Register a reconciler with explicit worker options
    pub fn register_with<F>(
        &mut self,
        name: impl Into<String>,
        options: WorkerOptions,
        factory: F,
    ) -> Result<()>
    where
        F: Fn() -> Arc<dyn Reconciler> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateReconciler(name));
        }
        debug!(reconciler = %name, workers = options.workers, retries = options.retries, "Registering reconciler");
        self.entries.insert(
            name,
            RegistryEntry {
                factory: Box::new(factory),
                options,
            },
        );
        Ok(())
    }

    /// Replace the options of a registered reconciler
    pub fn configure(&mut self, name: &str, options: WorkerOptions) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::UnknownReconciler(name.to_string()))?;
        entry.options = options;
        Ok(())
    }

    /// Options of a registered reconciler
    #[must_use]
    pub fn options(&self, name: &str) -> Option<WorkerOptions> {
        self.entries.get(name).map(|e| e.options)
    }

    /// Check if a reconciler is registered
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered reconcilers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build one instance of every enabled reconciler
    pub(crate) fn instantiate(&self) -> Vec<Instance> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.options.enabled)
            .map(|(name, entry)| Instance {
                name: name.clone(),
                options: entry.options,
                reconciler: (entry.factory)(),
            })
            .collect()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, e)| (name, e.options)))
            .finish()
    }
}

#[cfg(test)]
mod tests;
