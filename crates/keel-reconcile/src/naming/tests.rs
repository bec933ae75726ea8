use super::*;

#[test]
fn test_dns_label_sanitises() {
    assert_eq!(dns_label("Shop_Web"), "shop-web");
    assert_eq!(dns_label("--api--v2--"), "api-v2");
    assert_eq!(dns_label("a.b c"), "a-b-c");
    assert_eq!(dns_label("!!!"), "x");
}

#[test]
fn test_dns_label_truncates() {
    let long = "a".repeat(70);
    assert_eq!(dns_label(&long).len(), 63);

    // Truncation must not leave a trailing dash
    let edge = format!("{}-tail", "b".repeat(62));
    let label = dns_label(&edge);
    assert!(label.len() <= 63);
    assert!(!label.ends_with('-'));
}

#[test]
fn test_names_are_deterministic() {
    assert_eq!(namespace_name("staging", "shop"), "staging-shop");
    assert_eq!(workload_name("shop", "web"), "shop-web");
    assert_eq!(workload_name("shop", "web"), workload_name("shop", "web"));
}

#[test]
fn test_secret_bundle_names_are_fresh() {
    let a = secret_bundle_name("shop");
    let b = secret_bundle_name("shop");
    assert_ne!(a, b);
    assert!(a.starts_with("shop-"));
    assert_eq!(a.len(), "shop-".len() + 8);
    assert!(secret_bundle_name(&"s".repeat(80)).len() <= 63);
}

#[test]
fn test_workload_labels_include_selector() {
    let labels = workload_labels("shop", "web");
    assert_eq!(labels.get(APP_LABEL).map(String::as_str), Some("shop-web"));
    assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGER));
    assert!(keel_cluster::selector_matches(&app_selector("shop-web"), &labels));
    assert!(keel_cluster::selector_matches(&managed_selector(), &labels));
}
