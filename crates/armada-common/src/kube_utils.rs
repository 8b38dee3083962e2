//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for turning Helm manifests into typed references, building
//! `ApiResource`s for arbitrary kinds, and the status patch used by every
//! Armada controller.

use kube::api::{Api, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::Error;

/// Helm annotation naming the release that owns an object
pub const HELM_RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";

/// Helm annotation naming the namespace of the owning release
pub const HELM_RELEASE_NAMESPACE_ANNOTATION: &str = "meta.helm.sh/release-namespace";

/// Label linking a child resource to its parent Armada resource
pub const MEMBERSHIP_LABEL: &str = "app";

/// Reference to an object rendered by a Helm release
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Group, version and kind of the object
    pub gvk: GroupVersionKind,
    /// Object name
    pub name: String,
    /// Namespace, `None` when the manifest omitted it
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Build an `ApiResource` from the reference's GVK
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk, &pluralize_kind(&self.gvk.kind))
    }
}

/// Split a multi-document YAML manifest into JSON values.
///
/// Empty documents (comment-only templates, trailing separators) are
/// skipped.
pub fn split_manifest(manifest: &str) -> Result<Vec<serde_json::Value>, Error> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_json::Value::deserialize(doc)
            .map_err(|e| Error::serialization(format!("invalid manifest document: {e}")))?;
        if value.is_null() {
            continue;
        }
        docs.push(value);
    }
    Ok(docs)
}

/// Extract object references from a rendered Helm manifest.
///
/// Documents without `apiVersion`, `kind` or `metadata.name` are skipped
/// with a warning. `List` documents are expanded into their items.
pub fn parse_object_refs(manifest: &str) -> Result<Vec<ObjectRef>, Error> {
    let mut refs = Vec::new();
    for doc in split_manifest(manifest)? {
        collect_refs(&doc, &mut refs);
    }
    Ok(refs)
}

fn collect_refs(doc: &serde_json::Value, refs: &mut Vec<ObjectRef>) {
    let kind = doc.get("kind").and_then(|v| v.as_str()).unwrap_or_default();
    if kind.ends_with("List") {
        if let Some(items) = doc.get("items").and_then(|v| v.as_array()) {
            for item in items {
                collect_refs(item, refs);
            }
        }
        return;
    }

    match object_ref(doc) {
        Some(r) => refs.push(r),
        None => warn!(kind = %kind, "Skipping manifest document without apiVersion, kind or name"),
    }
}

/// Identity of a single object document, `None` when apiVersion, kind or
/// name is missing
pub fn object_ref(doc: &serde_json::Value) -> Option<ObjectRef> {
    let kind = doc.get("kind").and_then(|v| v.as_str()).filter(|k| !k.is_empty())?;
    let api_version = doc.get("apiVersion").and_then(|v| v.as_str())?;
    let name = doc.pointer("/metadata/name").and_then(|v| v.as_str())?;
    let (group, version) = parse_api_version(api_version);
    Some(ObjectRef {
        gvk: GroupVersionKind::gvk(&group, &version, kind),
        name: name.to_string(),
        namespace: doc
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use armada_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The plural is guessed with [`pluralize_kind`]. Use
/// [`resolve_api_resource`] when the server's answer matters.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Resolve a GVK against API discovery, returning the resource and its scope.
pub async fn resolve_api_resource(
    client: &Client,
    gvk: &GroupVersionKind,
) -> Result<(ApiResource, ApiCapabilities), Error> {
    kube::discovery::pinned_kind(client, gvk)
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "resolve_api_resource",
                format!("discovery failed for {}/{}: {e}", gvk.api_version(), gvk.kind),
            )
        })
}

/// True when discovery reports the resource as cluster-scoped
pub fn is_cluster_scoped(caps: &ApiCapabilities) -> bool {
    matches!(caps.scope, Scope::Cluster)
}

/// Irregular plurals of kinds commonly rendered by OpenStack-Helm charts
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("ingressclass", "ingressclasses"),
    ("runtimeclass", "runtimeclasses"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(s, _)| *s == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch.
///
/// Returns `kube::Error` so callers can map to their own error type.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    debug!(name = %name, namespace = %namespace, "Patched status");
    Ok(())
}

/// Remove the fields that change on every write without changing intent.
///
/// Drops `status`, `metadata.resourceVersion`, `metadata.managedFields` and
/// `metadata.generation` so two observations can be compared for spec or
/// metadata drift.
pub fn strip_volatile_fields(value: &serde_json::Value) -> serde_json::Value {
    let mut value = value.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("status");
        if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("resourceVersion");
            meta.remove("managedFields");
            meta.remove("generation");
        }
    }
    value
}

/// Read the Helm release annotations of an object, if both are present
pub fn helm_release_of(
    annotations: &std::collections::BTreeMap<String, String>,
) -> Option<(String, String)> {
    let name = annotations.get(HELM_RELEASE_NAME_ANNOTATION)?;
    let namespace = annotations.get(HELM_RELEASE_NAMESPACE_ANNOTATION)?;
    Some((name.clone(), namespace.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const MANIFEST: &str = r#"
---
# Source: mariadb/templates/configmap.yaml
apiVersion: v1
kind: ConfigMap
metadata:
  name: mariadb-etc
  namespace: openstack
data:
  my.cnf: ""
---
# Source: mariadb/templates/empty.yaml
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: mariadb-server
spec:
  replicas: 1
---
apiVersion: v1
kind: List
items:
  - apiVersion: batch/v1
    kind: Job
    metadata:
      name: mariadb-init
"#;

    mod manifests {
        use super::*;

        #[test]
        fn empty_documents_are_skipped() {
            let docs = split_manifest(MANIFEST).unwrap();
            assert_eq!(docs.len(), 3);
        }

        #[test]
        fn refs_carry_gvk_and_namespace() {
            let refs = parse_object_refs(MANIFEST).unwrap();
            assert_eq!(refs.len(), 3);

            assert_eq!(refs[0].gvk, GroupVersionKind::gvk("", "v1", "ConfigMap"));
            assert_eq!(refs[0].namespace.as_deref(), Some("openstack"));

            assert_eq!(refs[1].gvk.group, "apps");
            assert_eq!(refs[1].name, "mariadb-server");
            assert!(refs[1].namespace.is_none());
        }

        #[test]
        fn list_items_are_expanded() {
            let refs = parse_object_refs(MANIFEST).unwrap();
            assert_eq!(refs[2].gvk, GroupVersionKind::gvk("batch", "v1", "Job"));
            assert_eq!(refs[2].api_resource().plural, "jobs");
        }

        #[test]
        fn documents_without_identity_are_ignored() {
            let refs = parse_object_refs("kind: ConfigMap\nmetadata: {}\n").unwrap();
            assert!(refs.is_empty());
        }

        #[test]
        fn invalid_yaml_is_a_serialization_error() {
            let err = split_manifest("a: [unclosed").unwrap_err();
            assert!(matches!(err, Error::Serialization { .. }));
        }
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("argoproj.io/v1alpha1"),
            ("argoproj.io".to_string(), "v1alpha1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn test_build_api_resource() {
        let ar = build_api_resource("networking.k8s.io/v1", "NetworkPolicy");
        assert_eq!(ar.group, "networking.k8s.io");
        assert_eq!(ar.plural, "networkpolicies");
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Pod"), "pods");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Workflow"), "workflows");
    }

    #[test]
    fn strip_volatile_fields_keeps_spec_and_labels() {
        let obj = serde_json::json!({
            "metadata": {
                "name": "mariadb",
                "resourceVersion": "42",
                "generation": 3,
                "managedFields": [],
                "labels": {"app": "mariadb"}
            },
            "spec": {"replicas": 1},
            "status": {"readyReplicas": 1}
        });
        let stripped = strip_volatile_fields(&obj);
        assert!(stripped.get("status").is_none());
        assert!(stripped.pointer("/metadata/resourceVersion").is_none());
        assert!(stripped.pointer("/metadata/generation").is_none());
        assert_eq!(stripped.pointer("/metadata/labels/app").unwrap(), "mariadb");
        assert_eq!(stripped.pointer("/spec/replicas").unwrap(), 1);
    }

    #[test]
    fn helm_release_needs_both_annotations() {
        let mut annotations = BTreeMap::new();
        annotations.insert(HELM_RELEASE_NAME_ANNOTATION.to_string(), "mariadb".to_string());
        assert!(helm_release_of(&annotations).is_none());

        annotations.insert(
            HELM_RELEASE_NAMESPACE_ANNOTATION.to_string(),
            "openstack".to_string(),
        );
        assert_eq!(
            helm_release_of(&annotations),
            Some(("mariadb".to_string(), "openstack".to_string()))
        );
    }
}
