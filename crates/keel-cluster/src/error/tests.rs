use super::*;

#[test]
fn test_not_found_display() {
    let err = ClusterError::not_found("workload", "shop-web");
    assert_eq!(err.to_string(), "workload shop-web not found");
    assert!(err.is_not_found());
    assert!(!err.is_conflict());
}

#[test]
fn test_conflict_display() {
    let err = ClusterError::conflict("service", "shop-lb", "resource version 3 is stale");
    assert_eq!(
        err.to_string(),
        "conflict on service shop-lb: resource version 3 is stale"
    );
    assert!(err.is_conflict());
}
