use super::*;

#[test]
fn test_configuration_error_display() {
    let err = Error::configuration("kubernetes", "no cluster endpoint");
    assert_eq!(
        err.to_string(),
        "configuration error in kubernetes: no cluster endpoint"
    );
    assert!(err.is_fatal());
}

#[test]
fn test_runtime_errors_not_fatal() {
    assert!(!Error::BusClosed.is_fatal());
    assert!(!Error::Reconcile("boom".to_string()).is_fatal());
    assert!(!Error::Queue("down".to_string()).is_fatal());
}

#[test]
fn test_serialization_error_from() {
    let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
    let err: Error = parse.unwrap_err().into();
    assert!(matches!(err, Error::Serialization(_)));
}
