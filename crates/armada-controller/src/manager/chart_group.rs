//! Chart group membership: a group owns ArmadaCharts

use armada_common::crd::{
    ArmadaChart, ArmadaChartGroup, ArmadaChartSource, ArmadaChartSpec, ChartSourceType,
    HelmResourceState,
};
use kube::ResourceExt;

use super::parent::{membership_labels, MemberPolicy};

/// Chart used when a group member is scaffolded
const SCAFFOLD_CHART_LOCATION: &str = "/opt/armada/helm-charts/testchart";

impl MemberPolicy for ArmadaChartGroup {
    type Member = ArmadaChart;

    fn member_names(&self) -> Vec<String> {
        self.spec.charts.clone()
    }

    fn sequenced(&self) -> bool {
        self.spec.sequenced
    }

    fn expected_member(&self, name: &str) -> ArmadaChart {
        let mut chart = ArmadaChart::new(
            name,
            ArmadaChartSpec {
                chart_name: name.to_string(),
                release: format!("{name}-release"),
                source: ArmadaChartSource {
                    type_: ChartSourceType::Local,
                    location: SCAFFOLD_CHART_LOCATION.to_string(),
                    subpath: ".".to_string(),
                    reference: "master".to_string(),
                    ..Default::default()
                },
                dependencies: Vec::new(),
                target_state: Some(HelmResourceState::Uninitialized),
                ..Default::default()
            },
        );
        chart.metadata.namespace = self.namespace();
        chart.metadata.labels = Some(membership_labels(&self.name_any()));
        chart
    }
}
