use super::*;

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_selector_matches_subset() {
    let pod = labels(&[("app", "shop-web"), ("pod-template-hash", "3")]);
    assert!(selector_matches(&labels(&[("app", "shop-web")]), &pod));
    assert!(!selector_matches(&labels(&[("app", "shop-api")]), &pod));
    assert!(!selector_matches(
        &labels(&[("app", "shop-web"), ("tier", "front")]),
        &pod
    ));
}

#[test]
fn test_empty_selector_matches_everything() {
    assert!(selector_matches(&LabelSelector::new(), &labels(&[("a", "b")])));
}

#[test]
fn test_object_meta_builder() {
    let meta = ObjectMeta::new("dev-shop", "shop-web").with_label("app", "shop-web");
    assert_eq!(meta.namespace, "dev-shop");
    assert_eq!(meta.labels.get("app").map(String::as_str), Some("shop-web"));
    assert!(meta.resource_version.is_empty());
}
