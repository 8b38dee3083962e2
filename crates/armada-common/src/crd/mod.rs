//! Custom Resource Definitions for Armada
//!
//! This module contains the three CRDs reconciled by the operator and the
//! status model they share.

mod chart;
mod chart_group;
mod manifest;
mod resource;
mod types;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use chart::{
    ArmadaChart, ArmadaChartSource, ArmadaChartSpec, ArmadaDelete, ArmadaProtectedRelease,
    ArmadaResourceSelector, ArmadaTest, ArmadaTestOptions, ArmadaUpgrade, ArmadaUpgradeOptions,
    ArmadaUpgradePre, ArmadaWait, ArmadaWaitNative, ChartSourceType, CHART_FINALIZER,
};
pub use chart_group::{ArmadaChartGroup, ArmadaChartGroupSpec, CHART_GROUP_FINALIZER};
pub use manifest::{ArmadaManifest, ArmadaManifestSpec, MANIFEST_FINALIZER};
pub use resource::{HelmResource, HELPER_CHART_MARKER};
pub use types::{
    ArmadaStatus, ConditionReason, ConditionStatus, ConditionType, HelmResourceCondition,
    HelmResourceState,
};

/// API group of all Armada kinds
pub const ARMADA_GROUP: &str = "armada.airshipit.org";

/// All Armada CRDs, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ArmadaChart::crd(),
        ArmadaChartGroup::crd(),
        ArmadaManifest::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_crds_share_the_armada_group() {
        let crds = all_crds();
        assert_eq!(crds.len(), 3);
        for crd in crds {
            assert_eq!(crd.spec.group, ARMADA_GROUP);
            assert_eq!(crd.spec.scope, "Namespaced");
        }
    }
}
