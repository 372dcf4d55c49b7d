//! Provisioning of the target namespace of a [`ChartAssignment`] and the
//! image pull credentials workloads in that namespace need.

use chart_assignment_apis::ChartAssignment;
use k8s_openapi::{
    api::core::v1::{LocalObjectReference, Namespace, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    chrono::Utc,
};
use kube::ResourceExt;
use std::time::Duration;

use crate::{
    cluster_api::ClusterApi,
    errors::ControllerError,
    utils::{owner_reference, set_owner_reference},
};

/// Allow the service account controller some time to create the default
/// service account in a new namespace.
pub(crate) const DEFAULT_SERVICE_ACCOUNT_DEADLINE: Duration = Duration::from_secs(60);

const DEFAULT_SERVICE_ACCOUNT: &'static str = "default";

/// Where to find the image pull secret copied into every target namespace.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PullSecret {
    pub name: String,
    pub source_namespace: String,
}

/// Creates the target namespace if it does not exist and makes sure it is
/// owned by the assignment. No write happens if the owner reference is
/// already in place.
pub(crate) async fn ensure_namespace(
    store: &dyn ClusterApi,
    assignment: &ChartAssignment,
) -> Result<Namespace, ControllerError> {
    let name = assignment.spec.namespace_name.as_str();
    let existing = store.get_namespace(name).await?;
    if let Some(ts) = existing
        .as_ref()
        .and_then(|ns| ns.metadata.deletion_timestamp.as_ref())
    {
        return Err(ControllerError::NamespaceDeletionInProgress {
            name: name.to_string(),
            since: ts.0.to_rfc3339(),
        });
    }
    let create = existing.is_none();
    let mut ns = existing.unwrap_or_else(|| Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    let added = set_owner_reference(&mut ns.metadata, owner_reference(assignment)?);
    if !added {
        return Ok(ns);
    }
    ns.labels_mut()
        .insert("app".to_string(), assignment.name_any());
    if create {
        info!(
            "creating namespace {} for ChartAssignment {}",
            name,
            assignment.name_any()
        );
        store.create_namespace(&ns).await
    } else {
        info!(
            "adopting namespace {} for ChartAssignment {}",
            name,
            assignment.name_any()
        );
        store.replace_namespace(&ns).await
    }
}

/// Makes sure the target namespace has a copy of the image pull secret and
/// that its default service account references it. Needed for workloads
/// pulling images from a private container registry.
pub(crate) async fn ensure_service_account(
    store: &dyn ClusterApi,
    pull_secret: &PullSecret,
    ns: &Namespace,
    assignment: &ChartAssignment,
) -> Result<(), ControllerError> {
    let namespace = assignment.spec.namespace_name.as_str();
    let secret_name = pull_secret.name.as_str();
    // Service accounts cannot reference secrets in other namespaces, so copy it.
    if store.get_secret(namespace, secret_name).await?.is_none() {
        let source = match store
            .get_secret(pull_secret.source_namespace.as_str(), secret_name)
            .await?
        {
            Some(source) => source,
            None => {
                info!(
                    "Secret \"{}:{}\" not found (this is expected in simulated environments)",
                    pull_secret.source_namespace, secret_name
                );
                return Ok(());
            }
        };
        // Don't reuse the full metadata of the source secret.
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..source
        };
        store.create_secret(&secret).await?;
        debug!("copied Secret {} into namespace {}", secret_name, namespace);
    }

    let mut sa = match store
        .get_service_account(namespace, DEFAULT_SERVICE_ACCOUNT)
        .await?
    {
        Some(sa) => sa,
        None => {
            let age = ns
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|ct| Utc::now() - ct.0)
                .and_then(|age| age.to_std().ok())
                .unwrap_or_default();
            return if age < DEFAULT_SERVICE_ACCOUNT_DEADLINE {
                Err(ControllerError::ServiceAccountNotProvisioned {
                    namespace: namespace.to_string(),
                })
            } else {
                Err(ControllerError::ServiceAccountMissing {
                    namespace: namespace.to_string(),
                })
            };
        }
    };
    let secrets = sa.image_pull_secrets.get_or_insert_with(Vec::new);
    if secrets.iter().any(|s| s.name == secret_name) {
        return Ok(());
    }
    secrets.push(LocalObjectReference {
        name: secret_name.to_string(),
    });
    store.replace_service_account(&sa).await?;
    info!(
        "added image pull secret {} to ServiceAccount \"{}:{}\"",
        secret_name, namespace, DEFAULT_SERVICE_ACCOUNT
    );
    Ok(())
}
