//! Reconcile flow shared by the parent kinds
//!
//! Chart groups and manifests never talk to helm. They claim their members,
//! label them, and enable them by flipping the member's target state, then
//! report Deployed once every member is satisfied.

use std::sync::Arc;

use armada_common::crd::{
    ArmadaChartGroup, ArmadaManifest, ConditionReason, ConditionStatus, ConditionType,
    HelmResource, HelmResourceCondition,
};
use armada_common::events::actions;
use armada_common::{Error, ManagerResult};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::context::{ArmadaKind, Context};
use crate::lifecycle::{
    clear, ensure_finalizer, finish_uninstall, mark_initialized, park, record, synced,
    write_status_best_effort,
};
use crate::manager::{ArmadaManager, MemberPolicy, Members, ParentManager};

/// A parent kind the shared flow can reconcile
pub trait ParentKind: MemberPolicy + ArmadaKind {
    /// Poll while members come up instead of waiting for a member event
    const REQUEUE_UNTIL_READY: bool;
}

impl ParentKind for ArmadaChartGroup {
    const REQUEUE_UNTIL_READY: bool = true;
}

// Group status changes trigger the manifest, so polling is unnecessary
impl ParentKind for ArmadaManifest {
    const REQUEUE_UNTIL_READY: bool = false;
}

/// Reconcile a chart group or manifest
pub async fn reconcile_parent<P>(parent: Arc<P>, ctx: Arc<Context>) -> Result<Action, Error>
where
    P: ParentKind,
    P::Member: ArmadaKind,
{
    let mut parent = (*parent).clone();
    let defaulted = parent.init();
    let mut manager = ParentManager::new(parent.clone(), ctx.client::<P::Member>());
    info!(kind = %P::kind(&()), "Reconciling");

    if let Some(action) = ensure_finalizer(&parent, &ctx).await? {
        return Ok(action);
    }

    let sync = manager.sync().await;
    if let Err(e) = synced(&mut parent, sync, &ctx).await {
        if !parent.is_deleted() {
            return Err(e);
        }
    }

    if parent.is_deleted() {
        if !parent.has_armada_finalizer() {
            info!("Resource is terminated, skipping reconciliation");
            return Ok(Action::await_change());
        }
        let (members, error) = manager.uninstall_resource().await.into_parts();
        return finish_uninstall(&mut parent, error, &members.name, &ctx).await;
    }

    if parent.is_target_state_uninitialized() {
        return park(&parent, defaulted, &ctx).await;
    }

    mark_initialized(&mut parent);

    if !manager.is_installed() {
        let outcome = manager.install_resource().await;
        deploy(&mut parent, &manager, outcome, Deploy::Install, &ctx).await
    } else if manager.is_update_required() {
        let outcome = manager.update_resource().await;
        deploy(&mut parent, &manager, outcome, Deploy::Update, &ctx).await
    } else {
        reconcile_members(&mut parent, &manager, &ctx).await
    }
}

#[derive(Clone, Copy)]
enum Deploy {
    Install,
    Update,
}

impl Deploy {
    fn action(self) -> &'static str {
        match self {
            Self::Install => actions::INSTALL,
            Self::Update => actions::UPDATE,
        }
    }

    fn success(self) -> ConditionReason {
        match self {
            Self::Install => ConditionReason::InstallSuccessful,
            Self::Update => ConditionReason::UpdateSuccessful,
        }
    }

    fn failure(self) -> ConditionReason {
        match self {
            Self::Install => ConditionReason::InstallError,
            Self::Update => ConditionReason::UpdateError,
        }
    }
}

async fn deploy<P>(
    parent: &mut P,
    manager: &ParentManager<P>,
    outcome: ManagerResult<Members<P::Member>>,
    step: Deploy,
    ctx: &Context,
) -> Result<Action, Error>
where
    P: ParentKind,
    P::Member: ArmadaKind,
{
    let (members, error) = outcome.into_parts();
    if let Some(e) = error {
        clear(parent, ConditionType::Running);
        let cond = HelmResourceCondition::new(ConditionType::Failed, ConditionStatus::True)
            .reason(step.failure())
            .message(e.to_string())
            .resource(&members.name, 0);
        record(parent, cond, step.action(), ctx).await;
        write_status_best_effort(parent, ctx).await;
        return Err(e);
    }

    clear(parent, ConditionType::Failed);
    claim(manager, &members).await;
    let cond = HelmResourceCondition::new(ConditionType::Running, ConditionStatus::True)
        .reason(step.success())
        .resource(&members.name, 0);
    record(parent, cond, step.action(), ctx).await;
    write_status_best_effort(parent, ctx).await;
    Ok(Action::requeue(ctx.config.reconcile_period))
}

async fn reconcile_members<P>(
    parent: &mut P,
    manager: &ParentManager<P>,
    ctx: &Context,
) -> Result<Action, Error>
where
    P: ParentKind,
    P::Member: ArmadaKind,
{
    let (members, error) = manager.reconcile_resource().await.into_parts();
    if let Some(e) = error {
        let cond = HelmResourceCondition::new(ConditionType::Irreconcilable, ConditionStatus::True)
            .reason(ConditionReason::ReconcileError)
            .message(e.to_string())
            .resource(&members.name, 0);
        record(parent, cond, actions::RECONCILE, ctx).await;
        write_status_best_effort(parent, ctx).await;
        return Err(e);
    }
    clear(parent, ConditionType::Irreconcilable);
    claim(manager, &members).await;

    if members.is_ready() {
        clear(parent, ConditionType::Running);
        let cond = HelmResourceCondition::new(ConditionType::Deployed, ConditionStatus::True)
            .reason(ConditionReason::UnderlyingResourcesReady)
            .resource(&members.name, 0);
        record(parent, cond, actions::RECONCILE, ctx).await;
        write_status_best_effort(parent, ctx).await;
        info!(members = members.items.len(), "All members satisfied");
        return Ok(Action::await_change());
    }

    write_status_best_effort(parent, ctx).await;
    if P::REQUEUE_UNTIL_READY {
        Ok(Action::requeue(ctx.config.reconcile_period))
    } else {
        Ok(Action::await_change())
    }
}

async fn claim<P>(manager: &ParentManager<P>, members: &Members<P::Member>)
where
    P: ParentKind,
    P::Member: ArmadaKind,
{
    if let Some(e) = manager.claim_ownership(members).await.error {
        warn!(resource = %members.name, error = %e, "Failed to claim members");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::manager::MockReleaseManagers;
    use crate::testing::{chart, deployed, group, ContextFixture};
    use armada_common::crd::{ArmadaChart, HelmResourceState, CHART_GROUP_FINALIZER};
    use armada_common::kube_utils::MEMBERSHIP_LABEL;
    use std::collections::BTreeMap;

    fn with_finalizer(mut group: ArmadaChartGroup) -> Arc<ArmadaChartGroup> {
        group.metadata.finalizers = Some(vec![CHART_GROUP_FINALIZER.to_string()]);
        Arc::new(group)
    }

    /// Member already claimed and labelled by `parent`
    fn member_of(parent: &ArmadaChartGroup, mut chart: ArmadaChart) -> ArmadaChart {
        chart.metadata.owner_references = parent.controller_owner_ref(&()).map(|r| vec![r]);
        chart.metadata.labels = Some(BTreeMap::from([(
            MEMBERSHIP_LABEL.to_string(),
            parent.name_any(),
        )]));
        chart
    }

    fn disabled(name: &str) -> ArmadaChart {
        chart(name, Some(HelmResourceState::Uninitialized))
    }

    fn serving(charts: &mut MockResourceClient<ArmadaChart>, members: Vec<ArmadaChart>) {
        charts.expect_get().returning(move |name, _| {
            members
                .iter()
                .find(|c| c.name_any() == name)
                .cloned()
                .ok_or(Error::NotFound)
        });
    }

    #[tokio::test]
    async fn empty_parent_is_deployed_immediately() {
        let (ctx, capture) = ContextFixture::new().build(MockReleaseManagers::new());

        let action = reconcile_parent(with_finalizer(group("empty", &[], false)), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert_eq!(status.actual_state, HelmResourceState::Deployed);
        assert!(status.satisfied);
    }

    #[tokio::test]
    async fn unclaimed_members_are_claimed_on_install() {
        let parent = group("infra", &["mariadb"], false);
        let mut fixture = ContextFixture::new();
        serving(&mut fixture.charts, vec![chart("mariadb", None)]);
        fixture
            .charts
            .expect_set_controller_owner()
            .withf(|name, _, owner| name == "mariadb" && owner.uid == "infra-uid")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let action = reconcile_parent(with_finalizer(parent), ctx.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(ctx.config.reconcile_period));
        let status = capture.last().unwrap();
        let running = status
            .find_condition(ConditionType::Running, ConditionStatus::True)
            .unwrap();
        assert_eq!(running.reason, Some(ConditionReason::InstallSuccessful));
        assert_eq!(running.resource_name, "infra");
    }

    #[tokio::test]
    async fn members_missing_their_label_are_relabelled() {
        let parent = group("infra", &["mariadb"], false);
        let mut unlabelled = member_of(&parent, chart("mariadb", None));
        unlabelled.metadata.labels = None;
        let mut fixture = ContextFixture::new();
        serving(&mut fixture.charts, vec![unlabelled]);
        fixture
            .charts
            .expect_patch_labels()
            .withf(|name, _, labels| {
                name == "mariadb" && labels.get(MEMBERSHIP_LABEL).map(String::as_str) == Some("infra")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        reconcile_parent(with_finalizer(parent), ctx).await.unwrap();

        let status = capture.last().unwrap();
        let running = status
            .find_condition(ConditionType::Running, ConditionStatus::True)
            .unwrap();
        assert_eq!(running.reason, Some(ConditionReason::UpdateSuccessful));
    }

    #[tokio::test]
    async fn missing_member_fails_sync() {
        let mut fixture = ContextFixture::new();
        serving(&mut fixture.charts, Vec::new());
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let err = reconcile_parent(with_finalizer(group("infra", &["mariadb"], false)), ctx)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        let status = capture.last().unwrap();
        assert!(status
            .find_condition(ConditionType::Irreconcilable, ConditionStatus::True)
            .is_some());
    }

    /// Story: an unsequenced group enables every disabled member at once
    /// and keeps polling until they are all satisfied.
    #[tokio::test]
    async fn story_unsequenced_group_enables_everything() {
        let parent = group("infra", &["mariadb", "memcached"], false);
        let mut fixture = ContextFixture::new();
        serving(
            &mut fixture.charts,
            vec![
                member_of(&parent, disabled("mariadb")),
                member_of(&parent, disabled("memcached")),
            ],
        );
        fixture
            .charts
            .expect_patch_target_state()
            .withf(|_, _, state| *state == HelmResourceState::Deployed)
            .times(2)
            .returning(|_, _, _| Ok(()));
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let action = reconcile_parent(with_finalizer(parent), ctx.clone())
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(ctx.config.reconcile_period));
        assert!(!capture.last().unwrap().satisfied);
    }

    /// Story: a sequenced group waits on the first member before the second
    /// is enabled, and is deployed once both are satisfied.
    #[tokio::test]
    async fn story_sequenced_group_waits_for_each_member() {
        let parent = group("infra", &["mariadb", "memcached"], true);

        // First member enabled but not yet satisfied: nothing to do
        let mut fixture = ContextFixture::new();
        serving(
            &mut fixture.charts,
            vec![
                member_of(&parent, chart("mariadb", Some(HelmResourceState::Deployed))),
                member_of(&parent, disabled("memcached")),
            ],
        );
        fixture.charts.expect_patch_target_state().never();
        let (ctx, _capture) = fixture.build(MockReleaseManagers::new());
        reconcile_parent(with_finalizer(parent.clone()), ctx)
            .await
            .unwrap();

        // First member satisfied: the second one is enabled
        let mut fixture = ContextFixture::new();
        serving(
            &mut fixture.charts,
            vec![
                deployed(member_of(&parent, chart("mariadb", Some(HelmResourceState::Deployed)))),
                member_of(&parent, disabled("memcached")),
            ],
        );
        fixture
            .charts
            .expect_patch_target_state()
            .withf(|name, _, _| name == "memcached")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (ctx, _capture) = fixture.build(MockReleaseManagers::new());
        reconcile_parent(with_finalizer(parent.clone()), ctx)
            .await
            .unwrap();

        // Both satisfied: the group is deployed
        let mut fixture = ContextFixture::new();
        serving(
            &mut fixture.charts,
            vec![
                deployed(member_of(&parent, chart("mariadb", Some(HelmResourceState::Deployed)))),
                deployed(member_of(&parent, chart("memcached", Some(HelmResourceState::Deployed)))),
            ],
        );
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());
        let action = reconcile_parent(with_finalizer(parent), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert!(status
            .find_condition(ConditionType::Deployed, ConditionStatus::True)
            .is_some());
        assert!(status.satisfied);
    }

    /// Story: deleting a group deletes its charts and then lets go.
    #[tokio::test]
    async fn story_deleted_group_removes_its_charts() {
        let mut parent = group("infra", &["mariadb"], false);
        parent.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        let mut fixture = ContextFixture::new();
        serving(&mut fixture.charts, vec![member_of(&parent, chart("mariadb", None))]);
        fixture
            .charts
            .expect_delete()
            .withf(|name, _| name == "mariadb")
            .times(1)
            .returning(|_, _| Ok(()));
        fixture
            .groups
            .expect_remove_finalizer()
            .withf(|name, _, f| name == "infra" && f == CHART_GROUP_FINALIZER)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (ctx, capture) = fixture.build(MockReleaseManagers::new());

        let action = reconcile_parent(with_finalizer(parent), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert_eq!(status.actual_state, HelmResourceState::Uninstalled);
    }

    #[tokio::test]
    async fn failed_claim_does_not_fail_the_reconcile() {
        let parent = group("infra", &["mariadb"], false);
        let mut fixture = ContextFixture::new();
        serving(&mut fixture.charts, vec![chart("mariadb", None)]);
        fixture
            .charts
            .expect_set_controller_owner()
            .returning(|_, _, _| Err(Error::internal("conflict")));
        let (ctx, _capture) = fixture.build(MockReleaseManagers::new());

        assert!(reconcile_parent(with_finalizer(parent), ctx).await.is_ok());
    }
}
