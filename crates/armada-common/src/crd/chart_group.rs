//! ArmadaChartGroup CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::HelmResource;
use super::types::{ArmadaStatus, HelmResourceState};

/// Finalizer held on an ArmadaChartGroup until its charts are deleted
pub const CHART_GROUP_FINALIZER: &str = "uninstall-acg";

/// An ordered or unordered set of ArmadaCharts deployed as a unit
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "armada.airshipit.org",
    version = "v1alpha1",
    kind = "ArmadaChartGroup",
    plural = "armadachartgroups",
    shortname = "acg",
    namespaced,
    status = "ArmadaStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.actual_state","description":"State"}"#,
    printcolumn = r#"{"name":"Target State","type":"string","jsonPath":".spec.target_state","description":"Target State"}"#,
    printcolumn = r#"{"name":"Satisfied","type":"boolean","jsonPath":".status.satisfied","description":"Satisfied"}"#
)]
pub struct ArmadaChartGroupSpec {
    /// Names of the member ArmadaCharts, in deployment order
    #[serde(default)]
    pub charts: Vec<String>,

    /// Free-form description of the group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Name of the chart group as known to Armada
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Enable members one at a time, waiting for each to be satisfied
    #[serde(default)]
    pub sequenced: bool,

    /// Run release tests for every member chart
    #[serde(default)]
    pub test_charts: bool,

    /// Target state of the group
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

impl HelmResource for ArmadaChartGroup {
    const FINALIZER: &'static str = CHART_GROUP_FINALIZER;

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
