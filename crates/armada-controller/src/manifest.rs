//! ArmadaManifest reconciler

use std::sync::Arc;

use armada_common::crd::ArmadaManifest;
use armada_common::Error;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::instrument;

use crate::context::Context;
use crate::members::reconcile_parent;

pub use crate::lifecycle::error_policy;

/// Reconcile an ArmadaManifest: claim its chart groups and enable them in
/// order, each once the previous one is satisfied
#[instrument(
    skip(manifest, ctx),
    fields(manifest = %manifest.name_any(), namespace = %manifest.namespace().unwrap_or_default())
)]
pub async fn reconcile(manifest: Arc<ArmadaManifest>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_parent(manifest, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::manager::MockReleaseManagers;
    use crate::testing::{deployed, group, manifest, ContextFixture};
    use armada_common::crd::{
        ArmadaChartGroup, ConditionStatus, ConditionType, HelmResourceState, MANIFEST_FINALIZER,
    };
    use armada_common::kube_utils::MEMBERSHIP_LABEL;
    use kube::Resource;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn osh() -> ArmadaManifest {
        let mut manifest = manifest("osh", &["infra", "openstack"]);
        manifest.metadata.finalizers = Some(vec![MANIFEST_FINALIZER.to_string()]);
        manifest
    }

    fn member(manifest: &ArmadaManifest, name: &str) -> ArmadaChartGroup {
        let mut group = group(name, &[], false);
        group.spec.target_state = Some(HelmResourceState::Uninitialized);
        group.metadata.owner_references = manifest.controller_owner_ref(&()).map(|r| vec![r]);
        group.metadata.labels = Some(BTreeMap::from([(
            MEMBERSHIP_LABEL.to_string(),
            manifest.name_any(),
        )]));
        group
    }

    /// Groups held in memory, so target state patches are seen by the next
    /// pass the way they would be by an API server
    fn cluster(groups: &Arc<Mutex<Vec<ArmadaChartGroup>>>) -> MockResourceClient<ArmadaChartGroup> {
        let mut client = MockResourceClient::new();
        let store = groups.clone();
        client.expect_get().returning(move |name, _| {
            store
                .lock()
                .expect("mutex should not be poisoned")
                .iter()
                .find(|g| g.name_any() == name)
                .cloned()
                .ok_or(Error::NotFound)
        });
        let store = groups.clone();
        client
            .expect_patch_target_state()
            .returning(move |name, _, state| {
                let mut groups = store.lock().expect("mutex should not be poisoned");
                if let Some(g) = groups.iter_mut().find(|g| g.name_any() == name) {
                    g.spec.target_state = Some(state);
                }
                Ok(())
            });
        client
    }

    fn target_of(groups: &Arc<Mutex<Vec<ArmadaChartGroup>>>, name: &str) -> Option<HelmResourceState> {
        groups
            .lock()
            .expect("mutex should not be poisoned")
            .iter()
            .find(|g| g.name_any() == name)
            .and_then(|g| g.spec.target_state)
    }

    fn satisfy(groups: &Arc<Mutex<Vec<ArmadaChartGroup>>>, name: &str) {
        let mut groups = groups.lock().expect("mutex should not be poisoned");
        if let Some(g) = groups.iter_mut().find(|g| g.name_any() == name) {
            *g = deployed(g.clone());
        }
    }

    async fn pass(groups: &Arc<Mutex<Vec<ArmadaChartGroup>>>) -> (Action, crate::testing::StatusCapture) {
        let mut fixture = ContextFixture::new();
        fixture.groups = cluster(groups);
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());
        let action = reconcile(Arc::new(osh()), ctx).await.unwrap();
        (action, capture)
    }

    /// Story: a manifest enables its chart groups strictly in order. The
    /// second group stays disabled until the first is satisfied, and the
    /// manifest waits for group status changes rather than polling.
    #[tokio::test]
    async fn story_chart_groups_are_enabled_in_order() {
        let manifest = osh();
        let groups = Arc::new(Mutex::new(vec![
            member(&manifest, "infra"),
            member(&manifest, "openstack"),
        ]));

        let (action, _) = pass(&groups).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(target_of(&groups, "infra"), Some(HelmResourceState::Deployed));
        assert_eq!(target_of(&groups, "openstack"), Some(HelmResourceState::Uninitialized));

        // Nothing moves while the first group is still coming up
        let (_, capture) = pass(&groups).await;
        assert_eq!(target_of(&groups, "openstack"), Some(HelmResourceState::Uninitialized));
        assert!(!capture.last().unwrap().satisfied);

        satisfy(&groups, "infra");
        pass(&groups).await;
        assert_eq!(target_of(&groups, "openstack"), Some(HelmResourceState::Deployed));

        satisfy(&groups, "openstack");
        let (action, capture) = pass(&groups).await;
        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert!(status
            .find_condition(ConditionType::Deployed, ConditionStatus::True)
            .is_some());
        assert_eq!(status.actual_state, HelmResourceState::Deployed);
        assert!(status.satisfied);
    }
}
