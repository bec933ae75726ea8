use super::*;

struct Noop;

#[async_trait]
impl Reconciler for Noop {
    async fn start(&self, _sink: EventSink) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    fn subscriptions(&self) -> HashSet<String> {
        HashSet::from(["Deploy".to_string()])
    }

    async fn process(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

fn noop() -> Arc<dyn Reconciler> {
    Arc::new(Noop)
}

#[test]
fn test_register_and_lookup() {
    let mut registry = PluginRegistry::new();
    registry.register("kubernetes", noop).unwrap();

    assert!(registry.has("kubernetes"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.options("kubernetes"), Some(WorkerOptions::default()));
}

#[test]
fn test_duplicate_register_rejected() {
    let mut registry = PluginRegistry::new();
    registry.register("kubernetes", noop).unwrap();
    let err = registry.register("kubernetes", noop).unwrap_err();
    assert!(matches!(err, Error::DuplicateReconciler(name) if name == "kubernetes"));
}

#[test]
fn test_configure_unknown() {
    let mut registry = PluginRegistry::new();
    let err = registry
        .configure("missing", WorkerOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::UnknownReconciler(_)));
}

#[test]
fn test_instantiate_skips_disabled() {
    let mut registry = PluginRegistry::new();
    registry.register("a", noop).unwrap();
    registry
        .register_with("b", WorkerOptions::default().with_enabled(false), noop)
        .unwrap();

    let instances = registry.instantiate();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "a");
}

#[test]
fn test_names_sorted() {
    let mut registry = PluginRegistry::new();
    registry.register("loadbalancer", noop).unwrap();
    registry.register("deployments", noop).unwrap();
    assert_eq!(registry.names(), vec!["deployments", "loadbalancer"]);
}

#[test]
fn test_worker_options_builder() {
    let opts = WorkerOptions::default().with_workers(0).with_retries(2);
    assert_eq!(opts.workers, 1);
    assert_eq!(opts.retries, 2);
    assert!(opts.enabled);
}
