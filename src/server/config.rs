//! Server configuration types
//!
//! Contains all configuration structures for the keel binary.

use anyhow::{Context, Result};
use keel_core::{BusConfig, WorkerOptions};
use keel_reconcile::KubernetesConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusSection,
    /// Worker options by reconciler name
    #[serde(default)]
    pub reconcilers: BTreeMap<String, WorkerOptions>,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

impl AppConfig {
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Where queued events are kept until a worker takes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

/// `[bus]` section: dispatch settings plus the work-queue backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSection {
    #[serde(flatten)]
    pub dispatch: BusConfig,
    #[serde(default)]
    pub queue_backend: QueueBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            dispatch: BusConfig::default(),
            queue_backend: QueueBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}
