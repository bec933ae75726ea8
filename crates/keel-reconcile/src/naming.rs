//! Deterministic cluster names and labels
//!
//! Names are pure functions of their inputs so a retried command lands on
//! the same objects.

use keel_cluster::{LabelSelector, Labels};

/// Label marking objects this engine owns
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGER: &str = "keel";

/// Pod selector label
pub const APP_LABEL: &str = "app";

/// Project label
pub const PROJECT_LABEL: &str = "keel.dev/project";

/// Service label
pub const SERVICE_LABEL: &str = "keel.dev/service";

const MAX_LABEL_LEN: usize = 63;

/// Sanitise into a DNS-1123 label: lowercase alphanumerics and `-`, no
/// leading or trailing `-`, at most 63 characters.
#[must_use]
pub fn dns_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut dash = false;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    out.truncate(MAX_LABEL_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push('x');
    }
    out
}

/// Namespace for a project in an environment
#[must_use]
pub fn namespace_name(environment: &str, slug: &str) -> String {
    dns_label(&format!("{}-{}", environment, slug))
}

/// Workload name for a project's service
#[must_use]
pub fn workload_name(slug: &str, service: &str) -> String {
    dns_label(&format!("{}-{}", slug, service))
}

/// Fresh secret bundle name for one reconciliation pass
#[must_use]
pub fn secret_bundle_name(slug: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let base = dns_label(slug);
    let base = &base[..base.len().min(MAX_LABEL_LEN - 9)];
    format!("{}-{}", base.trim_end_matches('-'), &suffix[..8])
}

/// Selector matching the pods of one workload
#[must_use]
pub fn app_selector(workload: &str) -> LabelSelector {
    [(APP_LABEL.to_string(), workload.to_string())]
        .into_iter()
        .collect()
}

/// Selector matching every managed object
#[must_use]
pub fn managed_selector() -> LabelSelector {
    [(MANAGED_BY_LABEL.to_string(), MANAGER.to_string())]
        .into_iter()
        .collect()
}

/// Labels for a service's workload and pods
#[must_use]
pub fn workload_labels(slug: &str, service: &str) -> Labels {
    let mut labels = app_selector(&workload_name(slug, service));
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());
    labels.insert(PROJECT_LABEL.to_string(), dns_label(slug));
    labels.insert(SERVICE_LABEL.to_string(), dns_label(service));
    labels
}

#[cfg(test)]
mod tests;
