//! Get-or-create helpers shared by the reconcilers

use crate::error::Result;
use crate::manifest;
use keel_cluster::{ClusterApi, ClusterError, Secret};
use tracing::{debug, info};

/// Create the namespace if it does not exist yet
pub async fn ensure_namespace(cluster: &dyn ClusterApi, name: &str) -> Result<()> {
    match cluster.get_namespace(name).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => match cluster.create_namespace(manifest::namespace(name)).await {
            Ok(_) => {
                info!(namespace = %name, "Namespace created");
                Ok(())
            }
            // Lost a race with a concurrent reconciliation
            Err(ClusterError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

/// Create the secret unless one with the same name exists
pub async fn ensure_secret(cluster: &dyn ClusterApi, secret: Secret) -> Result<()> {
    let (namespace, name) = (secret.meta.namespace.clone(), secret.meta.name.clone());
    match cluster.get_secret(&namespace, &name).await {
        Ok(_) => {
            debug!(namespace = %namespace, secret = %name, "Secret already present");
            Ok(())
        }
        Err(e) if e.is_not_found() => match cluster.create_secret(secret).await {
            Ok(_) | Err(ClusterError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}
