//! Steps shared by the three reconcilers
//!
//! Every Armada kind goes through the same outer state machine: finalizer,
//! sync, deletion, parking while uninitialized. Only the install, update and
//! reconcile branches differ per kind.

use std::sync::Arc;
use std::time::Duration;

use armada_common::crd::{
    ConditionReason, ConditionStatus, ConditionType, HelmResource, HelmResourceCondition,
};
use armada_common::events::{actions, event_note_for, event_type_for};
use armada_common::Error;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::context::{ArmadaKind, Context};

/// Requeue delay after adding a finalizer
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay after a retryable error
pub const RETRY_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after a permanent error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

fn namespace_of<K: HelmResource>(obj: &K) -> String {
    obj.namespace().unwrap_or_default()
}

/// Set `cond` on the local copy and publish it as an event
pub async fn record<K: HelmResource>(
    obj: &mut K,
    cond: HelmResourceCondition,
    action: &str,
    ctx: &Context,
) {
    let event_type = event_type_for(&cond);
    let note = event_note_for(&cond);
    let reason = cond.type_.to_string();
    if cond.type_.is_failure() && cond.status == ConditionStatus::True {
        warn!(
            name = %obj.name_any(),
            condition = %cond.type_,
            reason = %cond.reason_str(),
            message = %cond.message,
            "Error condition"
        );
    } else {
        info!(
            name = %obj.name_any(),
            condition = %cond.type_,
            status = %cond.status,
            reason = %cond.reason_str(),
            "Success condition"
        );
    }

    let target = obj.target_state();
    obj.armada_status_mut().set_condition(cond, target);
    ctx.events
        .publish(&obj.object_ref(&()), event_type, &reason, action, note)
        .await;
}

/// Drop a condition from the local copy
pub fn clear<K: HelmResource>(obj: &mut K, type_: ConditionType) {
    let target = obj.target_state();
    obj.armada_status_mut().remove_condition(type_, target);
}

/// Persist the local copy's status
pub async fn write_status<K: ArmadaKind>(obj: &K, ctx: &Context) -> Result<(), Error> {
    let status = obj.armada_status().cloned().unwrap_or_default();
    ctx.client::<K>()
        .patch_status(&obj.name_any(), &namespace_of(obj), &status)
        .await
}

/// Persist the local copy's status, logging a failure
pub async fn write_status_best_effort<K: ArmadaKind>(obj: &K, ctx: &Context) {
    if let Err(e) = write_status(obj, ctx).await {
        warn!(name = %obj.name_any(), error = %e, "Failed to update status");
    }
}

/// Add the kind's finalizer when missing. Returns the action to take when
/// the reconcile must stop here.
pub async fn ensure_finalizer<K: ArmadaKind>(obj: &K, ctx: &Context) -> Result<Option<Action>, Error> {
    if obj.is_deleted() || obj.has_armada_finalizer() {
        return Ok(None);
    }
    ctx.client::<K>()
        .add_finalizer(&obj.name_any(), &namespace_of(obj), K::FINALIZER)
        .await?;
    info!(name = %obj.name_any(), finalizer = K::FINALIZER, "Added finalizer");
    Ok(Some(Action::requeue(FINALIZER_REQUEUE)))
}

/// Fold the outcome of a manager's `sync` into the status.
///
/// A failure sets `Irreconcilable` and is returned; success clears it.
pub async fn synced<K: ArmadaKind>(
    obj: &mut K,
    result: Result<(), Error>,
    ctx: &Context,
) -> Result<(), Error> {
    match result {
        Ok(()) => {
            clear(obj, ConditionType::Irreconcilable);
            Ok(())
        }
        Err(e) => {
            let cond = HelmResourceCondition::new(ConditionType::Irreconcilable, ConditionStatus::True)
                .reason(ConditionReason::ReconcileError)
                .message(e.to_string());
            record(obj, cond, actions::RECONCILE, ctx).await;
            write_status_best_effort(obj, ctx).await;
            Err(e)
        }
    }
}

/// Nothing to do until something enables the resource. The defaulted target
/// state is persisted so the resource shows up as explicitly disabled.
pub async fn park<K: ArmadaKind>(obj: &K, defaulted: bool, ctx: &Context) -> Result<Action, Error> {
    info!(name = %obj.name_any(), "Target state uninitialized, skipping");
    if defaulted {
        ctx.client::<K>()
            .patch_target_state(&obj.name_any(), &namespace_of(obj), obj.target_state())
            .await?;
    }
    write_status(obj, ctx).await?;
    Ok(Action::await_change())
}

/// The resource is being acted upon
pub fn mark_initialized<K: HelmResource>(obj: &mut K) {
    let target = obj.target_state();
    obj.armada_status_mut().set_condition(
        HelmResourceCondition::new(ConditionType::Initialized, ConditionStatus::True),
        target,
    );
}

/// Record the outcome of an uninstall and release the finalizer.
///
/// Any error other than not-found keeps the finalizer and is returned.
pub async fn finish_uninstall<K: ArmadaKind>(
    obj: &mut K,
    error: Option<Error>,
    resource_name: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    match error {
        Some(e) if !e.is_not_found() => {
            let cond = HelmResourceCondition::new(ConditionType::Failed, ConditionStatus::True)
                .reason(ConditionReason::UninstallError)
                .message(e.to_string())
                .resource(resource_name, 0);
            record(obj, cond, actions::UNINSTALL, ctx).await;
            write_status_best_effort(obj, ctx).await;
            return Err(e);
        }
        Some(_) => {
            clear(obj, ConditionType::Failed);
            info!(name = %obj.name_any(), "Already deleted, removing finalizer");
        }
        None => {
            clear(obj, ConditionType::Failed);
            let cond = HelmResourceCondition::new(ConditionType::Deployed, ConditionStatus::False)
                .reason(ConditionReason::UninstallSuccessful);
            record(obj, cond, actions::UNINSTALL, ctx).await;
        }
    }

    write_status(obj, ctx).await?;
    ctx.client::<K>()
        .remove_finalizer(&obj.name_any(), &namespace_of(obj), K::FINALIZER)
        .await?;
    info!(name = %obj.name_any(), finalizer = K::FINALIZER, "Removed finalizer");
    Ok(Action::await_change())
}

/// Requeue after 5s for retryable errors, 60s otherwise
pub fn error_policy<K: HelmResource>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        kind = %K::kind(&()),
        name = %obj.name_any(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(RETRY_REQUEUE)
    } else {
        Action::requeue(ERROR_REQUEUE)
    }
}
