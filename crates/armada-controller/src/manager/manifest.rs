//! Manifest membership: a manifest owns ArmadaChartGroups

use armada_common::crd::{ArmadaChartGroup, ArmadaChartGroupSpec, ArmadaManifest, HelmResourceState};
use kube::ResourceExt;

use super::parent::{membership_labels, MemberPolicy};

impl MemberPolicy for ArmadaManifest {
    type Member = ArmadaChartGroup;

    fn member_names(&self) -> Vec<String> {
        self.spec.chart_groups.clone()
    }

    /// Chart groups are always enabled one at a time
    fn sequenced(&self) -> bool {
        true
    }

    fn expected_member(&self, name: &str) -> ArmadaChartGroup {
        let manifest = self.name_any();
        let mut group = ArmadaChartGroup::new(
            name,
            ArmadaChartGroupSpec {
                name: name.to_string(),
                description: format!("Created by {manifest}"),
                sequenced: false,
                test_charts: false,
                target_state: Some(HelmResourceState::Uninitialized),
                ..Default::default()
            },
        );
        group.metadata.namespace = self.namespace();
        group.metadata.labels = Some(membership_labels(&manifest));
        group
    }
}
