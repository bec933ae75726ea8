//! Configuration validation
//!
//! Rejects settings the bus cannot run with and warns about risky ones.

use super::config::{AppConfig, QueueBackend};
use anyhow::{bail, Result};
use keel_core::DispatchMode;
use keel_reconcile::ClusterBackend;
use tracing::{info, warn};

/// Validate configuration before anything is started
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let queued = config.bus.dispatch.mode == DispatchMode::Queued;

    if queued && config.bus.queue_backend == QueueBackend::Redis && config.bus.redis_url.is_empty() {
        bail!("bus.queue_backend is \"redis\" but bus.redis_url is empty");
    }

    for (name, options) in &config.reconcilers {
        if options.enabled && options.workers == 0 {
            bail!("reconcilers.{}.workers must be at least 1", name);
        }
    }

    let kubernetes = &config.kubernetes;
    if kubernetes.backend == ClusterBackend::Kubernetes {
        if kubernetes.api_endpoint.is_empty() {
            info!("kubernetes.api_endpoint is empty; using kubeconfig or the in-cluster service account");
        } else if kubernetes.api_endpoint.starts_with("http://") && !kubernetes.token.is_empty() {
            warn!("kubernetes.token is sent over plain HTTP to {}", kubernetes.api_endpoint);
        }
    }

    if config.kubernetes.ssl_cert_arn.is_empty() {
        warn!("kubernetes.ssl_cert_arn is not set; HTTPS/SSL exposures will carry an empty certificate");
    }

    let is_production = std::env::var("KEEL_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false);
    if is_production
        && queued
        && config.bus.queue_backend == QueueBackend::Redis
        && !config.bus.redis_url.contains('@')
    {
        warn!(
            "SECURITY WARNING: Redis connection appears to have no authentication in production. \
             Consider enabling Redis AUTH."
        );
    }
    if is_production && config.bus.queue_backend == QueueBackend::Memory && queued {
        warn!("In-memory work queue in production: queued commands are lost on restart");
    }
    if is_production && kubernetes.backend == ClusterBackend::Memory {
        warn!("In-memory cluster backend in production: nothing is deployed to a real cluster");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::WorkerOptions;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_redis_backend_needs_url() {
        let mut config = AppConfig::default();
        config.bus.queue_backend = QueueBackend::Redis;
        config.bus.redis_url.clear();
        assert!(validate_config(&config).is_err());

        config.bus.dispatch.mode = DispatchMode::Inline;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_kubernetes_backend_without_endpoint_is_valid() {
        let mut config = AppConfig::default();
        config.kubernetes.backend = ClusterBackend::Kubernetes;
        assert!(validate_config(&config).is_ok());

        config.kubernetes.api_endpoint = "http://127.0.0.1:8001".to_string();
        config.kubernetes.token = "t0ken".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_enabled_reconciler_needs_workers() {
        let mut config = AppConfig::default();
        let mut options = WorkerOptions::default();
        options.workers = 0;
        config.reconcilers.insert("deployments".to_string(), options);
        assert!(validate_config(&config).is_err());

        options.enabled = false;
        config.reconcilers.insert("deployments".to_string(), options);
        assert!(validate_config(&config).is_ok());
    }
}
