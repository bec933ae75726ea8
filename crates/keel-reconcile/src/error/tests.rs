use super::*;

#[test]
fn test_cluster_errors_map_to_taxonomy() {
    let not_found: ReconcileError = ClusterError::not_found("service", "shop-lb").into();
    assert!(matches!(not_found, ReconcileError::NotFound(_)));
    assert_eq!(not_found.to_string(), "not found: service shop-lb not found");

    let conflict: ReconcileError = ClusterError::conflict("workload", "shop-web", "stale").into();
    assert!(matches!(conflict, ReconcileError::Conflict(_)));

    let down: ReconcileError = ClusterError::Unavailable("no route".to_string()).into();
    assert!(matches!(down, ReconcileError::Cluster(_)));
    assert_eq!(down.to_string(), "cluster error: cluster unavailable: no route");
    assert!(!keel_core::Error::from(down).is_fatal());

    let invalid: ReconcileError = ClusterError::Invalid("bad".to_string()).into();
    assert!(matches!(invalid, ReconcileError::Cluster(_)));
}

#[test]
fn test_configuration_is_fatal_on_the_bus() {
    let err: keel_core::Error = ReconcileError::Configuration("token rejected".to_string()).into();
    assert!(err.is_fatal());

    let err: keel_core::Error = ReconcileError::Timeout("rollout".to_string()).into();
    assert!(!err.is_fatal());
}
