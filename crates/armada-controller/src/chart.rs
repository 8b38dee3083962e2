//! ArmadaChart reconciler
//!
//! A chart maps to exactly one Helm release. Installing or upgrading it is
//! followed by requeues until every object the release rendered is ready.

use std::sync::Arc;

use armada_common::crd::{
    ArmadaChart, ConditionReason, ConditionStatus, ConditionType, HelmResource,
    HelmResourceCondition,
};
use armada_common::events::actions;
use armada_common::Error;
use armada_helm::HelmRelease;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use crate::context::Context;
use crate::lifecycle::{
    clear, ensure_finalizer, finish_uninstall, mark_initialized, park, record, synced,
    write_status_best_effort,
};
use crate::manager::ReleaseManager;

pub use crate::lifecycle::error_policy;

/// Reconcile an ArmadaChart
#[instrument(
    skip(chart, ctx),
    fields(chart = %chart.name_any(), namespace = %chart.namespace().unwrap_or_default())
)]
pub async fn reconcile(chart: Arc<ArmadaChart>, ctx: Arc<Context>) -> Result<Action, Error> {
    let mut chart = (*chart).clone();
    let defaulted = chart.init();

    // Helm calls are killed when this reconcile is dropped or the operator stops
    let cancel = ctx.cancel.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let mut release = ctx.releases.manager_for(&chart, cancel);
    info!(release = %release.release_name(), "Reconciling ArmadaChart");

    if let Some(action) = ensure_finalizer(&chart, &ctx).await? {
        return Ok(action);
    }

    let sync = release.sync().await;
    if let Err(e) = synced(&mut chart, sync, &ctx).await {
        if !chart.is_deleted() {
            return Err(e);
        }
    }

    if chart.is_deleted() {
        return uninstall(&mut chart, release.as_ref(), &ctx).await;
    }

    if chart.is_target_state_uninitialized() {
        return park(&chart, defaulted, &ctx).await;
    }

    mark_initialized(&mut chart);

    if !release.is_installed() {
        install(&mut chart, release.as_ref(), &ctx).await
    } else if release.is_update_required() {
        update(&mut chart, release.as_ref(), &ctx).await
    } else {
        reconcile_release(&mut chart, release.as_ref(), &ctx).await
    }
}

async fn uninstall(
    chart: &mut ArmadaChart,
    release: &dyn ReleaseManager,
    ctx: &Context,
) -> Result<Action, Error> {
    if !chart.has_armada_finalizer() {
        info!("ArmadaChart is terminated, skipping reconciliation");
        return Ok(Action::await_change());
    }

    info!(release = %release.release_name(), "Uninstalling release");
    let (uninstalled, error) = release.uninstall_release().await.into_parts();
    if error.as_ref().map_or(true, Error::is_not_found) {
        if let Some(watches) = &ctx.watches {
            watches.forget_release(&uninstalled.name, &uninstalled.namespace);
        }
    }
    finish_uninstall(chart, error, &uninstalled.name, ctx).await
}

/// Record a failed install or update and hand the error back
async fn deploy_failed(
    chart: &mut ArmadaChart,
    release: &HelmRelease,
    reason: ConditionReason,
    action: &str,
    error: Error,
    ctx: &Context,
) -> Result<Action, Error> {
    clear(chart, ConditionType::Running);
    let cond = HelmResourceCondition::new(ConditionType::Failed, ConditionStatus::True)
        .reason(reason)
        .message(error.to_string())
        .resource(&release.name, release.version);
    record(chart, cond, action, ctx).await;
    write_status_best_effort(chart, ctx).await;
    Err(error)
}

/// Record a successful install or update and requeue to follow readiness
async fn deployed(
    chart: &mut ArmadaChart,
    release: &HelmRelease,
    reason: ConditionReason,
    action: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    clear(chart, ConditionType::Failed);
    watch_dependents(chart, release, ctx).await;
    let cond = HelmResourceCondition::new(ConditionType::Running, ConditionStatus::True)
        .reason(reason)
        .message(release.notes.clone())
        .resource(&release.name, release.version);
    record(chart, cond, action, ctx).await;
    write_status_best_effort(chart, ctx).await;
    Ok(Action::requeue(ctx.config.reconcile_period))
}

async fn install(
    chart: &mut ArmadaChart,
    release: &dyn ReleaseManager,
    ctx: &Context,
) -> Result<Action, Error> {
    info!(release = %release.release_name(), "Installing release");
    match release.install_release().await.into_parts() {
        (installed, Some(e)) => {
            deploy_failed(chart, &installed, ConditionReason::InstallError, actions::INSTALL, e, ctx).await
        }
        (installed, None) => {
            deployed(chart, &installed, ConditionReason::InstallSuccessful, actions::INSTALL, ctx).await
        }
    }
}

async fn update(
    chart: &mut ArmadaChart,
    release: &dyn ReleaseManager,
    ctx: &Context,
) -> Result<Action, Error> {
    info!(release = %release.release_name(), "Updating release");
    match release.update_release().await.into_parts() {
        (updated, Some(e)) => {
            deploy_failed(chart, &updated, ConditionReason::UpdateError, actions::UPDATE, e, ctx).await
        }
        (updated, None) => {
            deployed(chart, &updated, ConditionReason::UpdateSuccessful, actions::UPDATE, ctx).await
        }
    }
}

async fn reconcile_release(
    chart: &mut ArmadaChart,
    release: &dyn ReleaseManager,
    ctx: &Context,
) -> Result<Action, Error> {
    let (reconciled, error) = release.reconcile_release().await.into_parts();
    if let Some(e) = error {
        clear(chart, ConditionType::Running);
        let cond = HelmResourceCondition::new(ConditionType::Irreconcilable, ConditionStatus::True)
            .reason(ConditionReason::ReconcileError)
            .message(e.to_string())
            .resource(&reconciled.name, reconciled.version);
        record(chart, cond, actions::RECONCILE, ctx).await;
        write_status_best_effort(chart, ctx).await;
        return Err(e);
    }
    clear(chart, ConditionType::Irreconcilable);
    watch_dependents(chart, &reconciled, ctx).await;

    if reconciled.is_failed_or_error() {
        clear(chart, ConditionType::Running);
        let cond = HelmResourceCondition::new(ConditionType::Error, ConditionStatus::True)
            .reason(ConditionReason::UnderlyingResourcesError)
            .resource(&reconciled.name, reconciled.version);
        record(chart, cond, actions::RECONCILE, ctx).await;
        write_status_best_effort(chart, ctx).await;
        return Ok(Action::await_change());
    }

    let ready = match release.is_release_ready(&reconciled).await {
        Ok(ready) => ready,
        Err(e) => {
            warn!(release = %reconciled.name, error = %e, "Failed to check release readiness");
            false
        }
    };

    if ready {
        clear(chart, ConditionType::Running);
        let cond = HelmResourceCondition::new(ConditionType::Deployed, ConditionStatus::True)
            .reason(ConditionReason::UnderlyingResourcesReady)
            .resource(&reconciled.name, reconciled.version);
        record(chart, cond, actions::RECONCILE, ctx).await;
        write_status_best_effort(chart, ctx).await;
        info!("Reconciled ArmadaChart");
        return Ok(Action::await_change());
    }

    write_status_best_effort(chart, ctx).await;
    Ok(Action::requeue(ctx.config.reconcile_period))
}

async fn watch_dependents(chart: &ArmadaChart, release: &HelmRelease, ctx: &Context) {
    let Some(watches) = &ctx.watches else {
        return;
    };
    if let Err(e) = watches.watch_release(chart, release).await {
        warn!(release = %release.name, error = %e, "Failed to update watch on dependent resources");
    }
}
