//! Configuration loading
//!
//! Layers, lowest priority first:
//! 1. embedded `config/default.toml`
//! 2. `config/{KEEL_ENV}.toml` (profile, `development` when unset)
//! 3. `config/local.toml`
//! 4. the file passed with `--config`, which must exist
//! 5. `KEEL_<SECTION>__<KEY>` variables, e.g. `KEEL_KUBERNETES__BACKEND=kubernetes`,
//!    `KEEL_RECONCILERS__DEPLOYMENTS__WORKERS=8` or
//!    `KEEL_KUBERNETES__OFFICE_SOURCE_RANGES=10.0.0.0/8,192.168.0.0/16`

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::Path;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

const ENV_PREFIX: &str = "KEEL";

/// Keys whose environment values are comma-separated lists
const LIST_KEYS: [&str; 1] = ["kubernetes.office_source_ranges"];

/// Active profile name
pub fn profile() -> String {
    std::env::var("KEEL_ENV").unwrap_or_else(|_| "development".to_string())
}

/// Load the configuration the server runs with
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    layered(&profile(), explicit, None)
}

fn environment(vars: Option<HashMap<String, String>>) -> Environment {
    // Single `_` after the prefix, `__` between nested keys
    let env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .try_parsing(true)
        .source(vars);
    LIST_KEYS
        .iter()
        .fold(env, |env, key| env.with_list_parse_key(key))
}

/// `vars` replaces the process environment when set
fn layered(
    profile: &str,
    explicit: Option<&Path>,
    vars: Option<HashMap<String, String>>,
) -> Result<AppConfig> {
    let mut builder = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name(&format!("config/{}", profile)).required(false))
        .add_source(File::with_name("config/local").required(false));
    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder
        .add_source(environment(vars))
        .build()
        .with_context(|| format!("Failed to build configuration for profile {}", profile))?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::QueueBackend;
    use keel_core::DispatchMode;
    use keel_reconcile::ClusterBackend;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn embedded() -> AppConfig {
        layered("unit", None, vars(&[])).unwrap()
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config = embedded();
        assert_eq!(config.bus.dispatch.queue_capacity, 10_000);
        assert_eq!(config.bus.dispatch.mode, DispatchMode::Queued);
        assert_eq!(config.bus.queue_backend, QueueBackend::Memory);
        assert_eq!(config.kubernetes.backend, ClusterBackend::Memory);
        assert_eq!(config.kubernetes.deploy_timeout_secs, 600);
        assert_eq!(config.kubernetes.poll_interval_secs, 5);
        assert!(config.kubernetes.registry.is_none());
    }

    #[test]
    fn test_embedded_reconciler_options() {
        let config = embedded();
        let deployments = config.reconcilers.get("deployments").unwrap();
        assert!(deployments.enabled);
        assert_eq!(deployments.workers, 4);
        assert!(config.reconcilers.contains_key("load_balancers"));
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let config = layered(
            "unit",
            None,
            vars(&[
                ("KEEL_BUS__MODE", "inline"),
                ("KEEL_RECONCILERS__DEPLOYMENTS__WORKERS", "8"),
                ("KEEL_KUBERNETES__BACKEND", "kubernetes"),
                ("KEEL_KUBERNETES__API_ENDPOINT", "https://10.0.0.1:6443"),
                ("KEEL_KUBERNETES__OFFICE_SOURCE_RANGES", "10.0.0.0/8,192.168.0.0/16"),
                ("OTHER_BUS__MODE", "queued"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bus.dispatch.mode, DispatchMode::Inline);
        assert_eq!(config.reconcilers["deployments"].workers, 8);
        assert_eq!(config.kubernetes.backend, ClusterBackend::Kubernetes);
        assert_eq!(config.kubernetes.api_endpoint, "https://10.0.0.1:6443");
        assert_eq!(
            config.kubernetes.office_source_ranges,
            vec!["10.0.0.0/8", "192.168.0.0/16"]
        );
    }

    #[test]
    fn test_explicit_file_sits_between_profile_and_environment() {
        let path = std::env::temp_dir().join(format!("keel-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[bus]\nqueue_capacity = 64\nmode = \"inline\"\n\n[kubernetes]\npoll_interval_secs = 2\n",
        )
        .unwrap();

        let config = layered("unit", Some(&path), vars(&[("KEEL_BUS__MODE", "queued")])).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.bus.dispatch.queue_capacity, 64);
        assert_eq!(config.kubernetes.poll_interval_secs, 2);
        assert_eq!(config.bus.dispatch.mode, DispatchMode::Queued);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let missing = std::env::temp_dir().join("keel-does-not-exist.toml");
        assert!(layered("unit", Some(&missing), vars(&[])).is_err());
    }

    #[test]
    fn test_effective_config_round_trips_through_toml() {
        let config = embedded();
        let rendered = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.bus.dispatch.mode, config.bus.dispatch.mode);
        assert_eq!(parsed.reconcilers, config.reconcilers);
    }
}
