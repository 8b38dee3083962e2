//! ArmadaManifest CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::HelmResource;
use super::types::{ArmadaStatus, HelmResourceState};

/// Finalizer held on an ArmadaManifest until its chart groups are deleted
pub const MANIFEST_FINALIZER: &str = "uninstall-amf";

/// Top-level ordered set of ArmadaChartGroups forming an application
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "armada.airshipit.org",
    version = "v1alpha1",
    kind = "ArmadaManifest",
    plural = "armadamanifests",
    shortname = "amf",
    namespaced,
    status = "ArmadaStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.actual_state","description":"State"}"#,
    printcolumn = r#"{"name":"Target State","type":"string","jsonPath":".spec.target_state","description":"Target State"}"#,
    printcolumn = r#"{"name":"Satisfied","type":"boolean","jsonPath":".status.satisfied","description":"Satisfied"}"#
)]
pub struct ArmadaManifestSpec {
    /// Names of the member ArmadaChartGroups, in deployment order
    #[serde(default)]
    pub chart_groups: Vec<String>,

    /// Prefix prepended to release names
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_prefix: String,

    /// Target state of the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_state: Option<HelmResourceState>,

    /// Number of revisions kept in the history
    #[serde(
        default,
        rename = "revisionHistoryLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_history_limit: Option<i32>,
}

impl HelmResource for ArmadaManifest {
    const FINALIZER: &'static str = MANIFEST_FINALIZER;

    fn spec_target_state(&self) -> Option<HelmResourceState> {
        self.spec.target_state
    }

    fn set_target_state(&mut self, state: HelmResourceState) {
        self.spec.target_state = Some(state);
    }

    fn armada_status(&self) -> Option<&ArmadaStatus> {
        self.status.as_ref()
    }

    fn armada_status_mut(&mut self) -> &mut ArmadaStatus {
        self.status.get_or_insert_with(ArmadaStatus::default)
    }
}
