//! Live access to the objects a release rendered

use std::collections::HashMap;

use armada_common::kube_utils::{
    is_cluster_scoped, object_ref, resolve_api_resource, ObjectRef,
};
use armada_common::Error;
use async_trait::async_trait;
use kube::api::{Api, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource};
use kube::Client;
use parking_lot::RwLock;
use tracing::info;

use crate::release::DependentClient;

/// [`DependentClient`] backed by the dynamic Kubernetes API.
///
/// Discovery results are cached per GVK for the life of the process.
pub struct KubeDependentClient {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl KubeDependentClient {
    /// Wrap a Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn api_for(
        &self,
        dependent: &ObjectRef,
        default_namespace: &str,
    ) -> Result<(Api<DynamicObject>, bool), Error> {
        let cached = self.resources.read().get(&dependent.gvk).cloned();
        let (ar, caps) = match cached {
            Some(found) => found,
            None => {
                let found = resolve_api_resource(&self.client, &dependent.gvk).await?;
                self.resources
                    .write()
                    .insert(dependent.gvk.clone(), found.clone());
                found
            }
        };

        if is_cluster_scoped(&caps) {
            return Ok((Api::all_with(self.client.clone(), &ar), false));
        }
        let namespace = dependent.namespace.as_deref().unwrap_or(default_namespace);
        Ok((Api::namespaced_with(self.client.clone(), namespace, &ar), true))
    }
}

#[async_trait]
impl DependentClient for KubeDependentClient {
    async fn get(
        &self,
        dependent: &ObjectRef,
        default_namespace: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let (api, _) = self.api_for(dependent, default_namespace).await?;
        match api.get_opt(&dependent.name).await? {
            Some(obj) => serde_json::to_value(obj)
                .map(Some)
                .map_err(|e| Error::serialization_for_kind(&dependent.gvk.kind, e.to_string())),
            None => Ok(None),
        }
    }

    async fn restore(
        &self,
        object: &serde_json::Value,
        default_namespace: &str,
    ) -> Result<bool, Error> {
        let Some(dependent) = object_ref(object) else {
            return Ok(false);
        };
        let (api, namespaced) = self.api_for(&dependent, default_namespace).await?;
        if api.get_opt(&dependent.name).await?.is_some() {
            return Ok(false);
        }

        let mut obj: DynamicObject = serde_json::from_value(object.clone())
            .map_err(|e| Error::serialization_for_kind(&dependent.gvk.kind, e.to_string()))?;
        if namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(default_namespace.to_string());
        }
        api.create(&PostParams::default(), &obj).await?;
        info!(kind = %dependent.gvk.kind, name = %dependent.name, "Recreated missing release object");
        Ok(true)
    }
}
