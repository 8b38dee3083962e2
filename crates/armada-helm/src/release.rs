//! Helm release model
//!
//! A [`HelmRelease`] is what `helm status -o json` (and install/upgrade with
//! `-o json`) report about one revision of a release. The objects the
//! release rendered are parsed from its manifest on first use.

use std::sync::OnceLock;

use armada_common::kube_utils::{parse_object_refs, ObjectRef};
use armada_common::readiness::is_object_ready;
use armada_common::Error;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Status of a release revision as reported by helm
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    /// Revision is live
    Deployed,
    /// Release was uninstalled with history kept
    Uninstalled,
    /// Revision was replaced by a newer one
    Superseded,
    /// Install or upgrade failed
    Failed,
    /// Uninstall in progress
    Uninstalling,
    /// Install in progress
    PendingInstall,
    /// Upgrade in progress
    PendingUpgrade,
    /// Rollback in progress
    PendingRollback,
    /// Status not reported or not recognized
    #[default]
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    /// True while helm holds a lock on the release
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback | Self::Uninstalling
        )
    }
}

/// One revision of a Helm release
#[derive(Clone, Debug, Default)]
pub struct HelmRelease {
    /// Release name
    pub name: String,
    /// Release namespace
    pub namespace: String,
    /// Revision number
    pub version: i32,
    /// Revision status
    pub status: ReleaseStatus,
    /// Rendered NOTES.txt
    pub notes: String,
    /// Rendered manifest (multi-document YAML)
    pub manifest: String,
    dependents: OnceLock<Vec<ObjectRef>>,
}

#[derive(Deserialize)]
struct RawRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    version: i32,
    #[serde(default)]
    info: RawInfo,
    #[serde(default)]
    manifest: String,
}

#[derive(Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    status: ReleaseStatus,
    #[serde(default)]
    notes: String,
}

impl HelmRelease {
    /// A release known only by name, used when helm returned nothing
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Parse helm's JSON release output
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let raw: RawRelease = serde_json::from_str(json)
            .map_err(|e| Error::serialization(format!("invalid helm release output: {e}")))?;
        Ok(Self {
            name: raw.name,
            namespace: raw.namespace,
            version: raw.version,
            status: raw.info.status,
            notes: raw.info.notes,
            manifest: raw.manifest,
            dependents: OnceLock::new(),
        })
    }

    /// Replace the manifest, dropping previously parsed dependents
    pub fn with_manifest(mut self, manifest: String) -> Self {
        self.manifest = manifest;
        self.dependents = OnceLock::new();
        self
    }

    /// Objects rendered by this release.
    ///
    /// A manifest that fails to parse yields no dependents.
    pub fn dependents(&self) -> &[ObjectRef] {
        self.dependents.get_or_init(|| {
            parse_object_refs(&self.manifest).unwrap_or_else(|e| {
                warn!(release = %self.name, error = %e, "Failed to parse release manifest");
                Vec::new()
            })
        })
    }

    /// True when the last operation on the release failed
    pub fn is_failed_or_error(&self) -> bool {
        self.status == ReleaseStatus::Failed
    }

    /// Check every dependent against the readiness table.
    ///
    /// A dependent that no longer exists is not ready.
    pub async fn is_ready(&self, lookup: &dyn DependentClient) -> Result<bool, Error> {
        for dep in self.dependents() {
            match lookup.get(dep, &self.namespace).await? {
                Some(live) if is_object_ready(&live) => {}
                Some(_) => {
                    debug!(release = %self.name, kind = %dep.gvk.kind, name = %dep.name, "Dependent not ready");
                    return Ok(false);
                }
                None => {
                    debug!(release = %self.name, kind = %dep.gvk.kind, name = %dep.name, "Dependent missing");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Whether the rendered manifests differ, ignoring whitespace
    pub fn manifest_differs(&self, other: &str) -> bool {
        normalize_manifest(&self.manifest) != normalize_manifest(other)
    }
}

fn normalize_manifest(manifest: &str) -> String {
    manifest
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads and restores the live objects rendered by a release
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DependentClient: Send + Sync {
    /// Current object, `None` when it does not exist.
    ///
    /// `default_namespace` applies to namespaced objects whose manifest did
    /// not name a namespace.
    async fn get(
        &self,
        dependent: &ObjectRef,
        default_namespace: &str,
    ) -> Result<Option<serde_json::Value>, Error>;

    /// Create `object` from its manifest document when it no longer exists.
    ///
    /// Returns true when the object had to be recreated.
    async fn restore(
        &self,
        object: &serde_json::Value,
        default_namespace: &str,
    ) -> Result<bool, Error>;
}
