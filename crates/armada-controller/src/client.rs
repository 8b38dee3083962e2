//! Typed Kubernetes access for the three Armada kinds
//!
//! Reconcilers and managers talk to the API server only through
//! [`ResourceClient`], so tests can substitute a mock per kind.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use armada_common::crd::{ArmadaStatus, HelmResource, HelmResourceState};
use armada_common::Error;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// CRUD operations on one Armada kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient<K: HelmResource>: Send + Sync {
    /// Fetch an object; a missing object is an [`Error`] for which
    /// `is_not_found()` holds
    async fn get(&self, name: &str, namespace: &str) -> Result<K, Error>;

    /// Set `spec.target_state`
    async fn patch_target_state(
        &self,
        name: &str,
        namespace: &str,
        state: HelmResourceState,
    ) -> Result<(), Error>;

    /// Merge labels into `metadata.labels`
    async fn patch_labels(
        &self,
        name: &str,
        namespace: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Make `owner` the controller owner of the object
    async fn set_controller_owner(
        &self,
        name: &str,
        namespace: &str,
        owner: OwnerReference,
    ) -> Result<(), Error>;

    /// Delete an object
    async fn delete(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Replace the status sub-resource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ArmadaStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer if missing
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer if present
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// [`ResourceClient`] backed by the API server
pub struct KubeResourceClient<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResourceClient<K> {
    /// Write as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }
}

impl<K: HelmResource> KubeResourceClient<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager)
    }

    async fn merge(&self, name: &str, namespace: &str, patch: serde_json::Value) -> Result<(), Error> {
        self.api(namespace)
            .patch(name, &self.params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<K: HelmResource> ResourceClient<K> for KubeResourceClient<K> {
    async fn get(&self, name: &str, namespace: &str) -> Result<K, Error> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn patch_target_state(
        &self,
        name: &str,
        namespace: &str,
        state: HelmResourceState,
    ) -> Result<(), Error> {
        debug!(name = %name, namespace = %namespace, state = %state, "Patching target state");
        self.merge(
            name,
            namespace,
            serde_json::json!({ "spec": { "target_state": state } }),
        )
        .await
    }

    async fn patch_labels(
        &self,
        name: &str,
        namespace: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.merge(
            name,
            namespace,
            serde_json::json!({ "metadata": { "labels": labels } }),
        )
        .await
    }

    async fn set_controller_owner(
        &self,
        name: &str,
        namespace: &str,
        owner: OwnerReference,
    ) -> Result<(), Error> {
        let current = self.api(namespace).get(name).await?;
        let mut refs: Vec<OwnerReference> = current
            .meta()
            .owner_references
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.uid != owner.uid && r.controller != Some(true))
            .collect();
        refs.push(owner);
        self.merge(
            name,
            namespace,
            serde_json::json!({ "metadata": { "ownerReferences": refs } }),
        )
        .await
    }

    async fn delete(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.api(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ArmadaStatus,
    ) -> Result<(), Error> {
        armada_common::kube_utils::patch_resource_status::<K>(
            &self.client,
            name,
            namespace,
            status,
            &self.field_manager,
        )
        .await?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let current = self.api(namespace).get(name).await?;
        let mut finalizers = current.meta().finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.merge(
            name,
            namespace,
            serde_json::json!({ "metadata": { "finalizers": finalizers } }),
        )
        .await
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let Some(current) = self.api(namespace).get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = current
            .meta()
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.merge(
            name,
            namespace,
            serde_json::json!({ "metadata": { "finalizers": finalizers } }),
        )
        .await
    }
}
