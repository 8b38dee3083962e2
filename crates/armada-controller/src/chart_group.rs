//! ArmadaChartGroup reconciler

use std::sync::Arc;

use armada_common::crd::ArmadaChartGroup;
use armada_common::Error;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::instrument;

use crate::context::Context;
use crate::members::reconcile_parent;

pub use crate::lifecycle::error_policy;

/// Reconcile an ArmadaChartGroup: claim its charts and enable them, one at a
/// time when the group is sequenced
#[instrument(
    skip(group, ctx),
    fields(group = %group.name_any(), namespace = %group.namespace().unwrap_or_default())
)]
pub async fn reconcile(group: Arc<ArmadaChartGroup>, ctx: Arc<Context>) -> Result<Action, Error> {
    reconcile_parent(group, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MockReleaseManagers;
    use crate::testing::{group, ContextFixture};
    use armada_common::crd::{HelmResourceState, CHART_GROUP_FINALIZER};
    use std::time::Duration;

    #[tokio::test]
    async fn new_group_gets_its_finalizer() {
        let mut fixture = ContextFixture::new();
        fixture
            .groups
            .expect_add_finalizer()
            .withf(|name, _, f| name == "infra" && f == CHART_GROUP_FINALIZER)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let action = reconcile(Arc::new(group("infra", &["mariadb"], false)), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert!(!capture.was_updated());
    }

    #[tokio::test]
    async fn disabled_group_is_parked() {
        let mut disabled = group("infra", &["mariadb"], false);
        disabled.spec.target_state = Some(HelmResourceState::Uninitialized);
        disabled.metadata.finalizers = Some(vec![CHART_GROUP_FINALIZER.to_string()]);
        let mut fixture = ContextFixture::new();
        fixture
            .charts
            .expect_get()
            .returning(|name, _| Ok(crate::testing::chart(name, None)));
        fixture.charts.expect_patch_target_state().never();
        fixture.groups.expect_patch_target_state().never();
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let action = reconcile(Arc::new(disabled), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(capture.last().unwrap().actual_state, HelmResourceState::Uninitialized);
    }
}
