//! Fixtures shared by the reconciler tests

use std::sync::{Arc, Mutex};

use armada_common::crd::{
    ArmadaChart, ArmadaChartGroup, ArmadaChartGroupSpec, ArmadaChartSpec, ArmadaManifest,
    ArmadaManifestSpec, ArmadaStatus, HelmResourceState,
};
use armada_common::events::EventPublisher;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;

use crate::client::MockResourceClient;
use crate::context::Context;
use crate::manager::ReleaseManagers;
use crate::watches::DependentWatches;

pub const NAMESPACE: &str = "openstack";

/// Captured status writes, so tests check what was written rather than how
#[derive(Clone, Default)]
pub struct StatusCapture {
    updates: Arc<Mutex<Vec<ArmadaStatus>>>,
}

impl StatusCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: ArmadaStatus) {
        self.updates
            .lock()
            .expect("mutex should not be poisoned")
            .push(status);
    }

    pub fn last(&self) -> Option<ArmadaStatus> {
        self.updates
            .lock()
            .expect("mutex should not be poisoned")
            .last()
            .cloned()
    }

    pub fn was_updated(&self) -> bool {
        !self
            .updates
            .lock()
            .expect("mutex should not be poisoned")
            .is_empty()
    }
}

/// Event publisher remembering what was published
#[derive(Default)]
pub struct EventCapture {
    events: Mutex<Vec<(EventType, String)>>,
}

impl EventCapture {
    pub fn contains(&self, type_: EventType, reason: &str) -> bool {
        self.events
            .lock()
            .expect("mutex should not be poisoned")
            .iter()
            .any(|(t, r)| *t == type_ && r == reason)
    }
}

#[async_trait]
impl EventPublisher for EventCapture {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events
            .lock()
            .expect("mutex should not be poisoned")
            .push((type_, reason.to_string()));
    }
}

/// Mocks behind a test [`Context`]. Set expectations on the clients, then
/// call [`ContextFixture::build`]; status writes of every kind go to the
/// returned capture.
pub struct ContextFixture {
    pub charts: MockResourceClient<ArmadaChart>,
    pub groups: MockResourceClient<ArmadaChartGroup>,
    pub manifests: MockResourceClient<ArmadaManifest>,
    pub events: Arc<EventCapture>,
    pub watches: Option<Arc<dyn DependentWatches>>,
}

impl ContextFixture {
    pub fn new() -> Self {
        Self {
            charts: MockResourceClient::new(),
            groups: MockResourceClient::new(),
            manifests: MockResourceClient::new(),
            events: Arc::new(EventCapture::default()),
            watches: None,
        }
    }

    pub fn build(mut self, releases: impl ReleaseManagers + 'static) -> (Arc<Context>, StatusCapture) {
        let capture = StatusCapture::new();
        let c = capture.clone();
        self.charts.expect_patch_status().returning(move |_, _, status| {
            c.record(status.clone());
            Ok(())
        });
        let c = capture.clone();
        self.groups.expect_patch_status().returning(move |_, _, status| {
            c.record(status.clone());
            Ok(())
        });
        let c = capture.clone();
        self.manifests.expect_patch_status().returning(move |_, _, status| {
            c.record(status.clone());
            Ok(())
        });

        let mut ctx = Context::for_testing(
            Arc::new(self.charts),
            Arc::new(self.groups),
            Arc::new(self.manifests),
            Arc::new(releases),
            self.events,
        );
        ctx.watches = self.watches;
        (Arc::new(ctx), capture)
    }
}

pub fn chart(name: &str, target: Option<HelmResourceState>) -> ArmadaChart {
    let mut chart = ArmadaChart::new(
        name,
        ArmadaChartSpec {
            chart_name: name.to_string(),
            release: format!("{name}-release"),
            namespace: Some(NAMESPACE.to_string()),
            target_state: target,
            ..Default::default()
        },
    );
    chart.metadata.namespace = Some(NAMESPACE.to_string());
    chart.metadata.uid = Some(format!("{name}-uid"));
    chart
}

pub fn group(name: &str, charts: &[&str], sequenced: bool) -> ArmadaChartGroup {
    let mut group = ArmadaChartGroup::new(
        name,
        ArmadaChartGroupSpec {
            charts: charts.iter().map(|c| c.to_string()).collect(),
            sequenced,
            target_state: Some(HelmResourceState::Deployed),
            ..Default::default()
        },
    );
    group.metadata.namespace = Some(NAMESPACE.to_string());
    group.metadata.uid = Some(format!("{name}-uid"));
    group
}

pub fn manifest(name: &str, groups: &[&str]) -> ArmadaManifest {
    let mut manifest = ArmadaManifest::new(
        name,
        ArmadaManifestSpec {
            chart_groups: groups.iter().map(|g| g.to_string()).collect(),
            target_state: Some(HelmResourceState::Deployed),
            ..Default::default()
        },
    );
    manifest.metadata.namespace = Some(NAMESPACE.to_string());
    manifest.metadata.uid = Some(format!("{name}-uid"));
    manifest
}

/// Mark a member as deployed and satisfied
pub fn deployed<K: armada_common::crd::HelmResource>(mut obj: K) -> K {
    let status = obj.armada_status_mut();
    status.actual_state = HelmResourceState::Deployed;
    status.satisfied = true;
    obj
}
