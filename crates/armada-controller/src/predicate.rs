//! Filter for events on dependent objects
//!
//! Children are only ever created by the reconciler, so creations never
//! trigger. Deletions always do, so the child can be recreated. Updates
//! trigger on a readiness-relevant status change, or when anything besides
//! status and write bookkeeping differs. For Armada members the relevant
//! status is whether they are satisfied.

use armada_common::crd::ARMADA_GROUP;
use armada_common::kube_utils::strip_volatile_fields;
use armada_common::readiness::object_status_changed;
use serde_json::Value;
use tracing::debug;

/// Kinds whose updates never trigger a reconcile
const IGNORED_UPDATE_KINDS: &[&str] = &["ConfigMap", "Secret"];

/// A change observed on a dependent object
#[derive(Clone, Copy, Debug)]
pub enum DependentEvent<'a> {
    /// Object appeared
    Create(&'a Value),
    /// Object changed from `old` to `new`
    Update {
        /// Previous observation
        old: &'a Value,
        /// Current observation
        new: &'a Value,
    },
    /// Object disappeared
    Delete(&'a Value),
}

/// Decides which dependent events reach the owner's reconciler
#[derive(Clone, Copy, Debug, Default)]
pub struct DependentPredicate;

impl DependentPredicate {
    /// Whether `event` should trigger the owner
    pub fn should_reconcile(&self, event: &DependentEvent<'_>) -> bool {
        match event {
            DependentEvent::Create(_) => false,
            DependentEvent::Delete(_) => true,
            DependentEvent::Update { old, new } => update_triggers(old, new),
        }
    }
}

fn kind_of(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or_default()
}

fn name_of(obj: &Value) -> &str {
    obj.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn is_armada_member(obj: &Value) -> bool {
    obj.get("apiVersion")
        .and_then(Value::as_str)
        .is_some_and(|v| v.starts_with(&format!("{ARMADA_GROUP}/")))
}

fn member_status_changed(old: &Value, new: &Value) -> bool {
    is_armada_member(old)
        && ["/status/actual_state", "/status/satisfied"]
            .iter()
            .any(|path| old.pointer(path) != new.pointer(path))
}

fn update_triggers(old: &Value, new: &Value) -> bool {
    let kind = kind_of(old);
    if IGNORED_UPDATE_KINDS.contains(&kind) {
        return false;
    }

    if object_status_changed(Some(old), Some(new)) || member_status_changed(old, new) {
        debug!(kind, name = name_of(new), "Dependent status changed");
        return true;
    }

    let changed = strip_volatile_fields(old) != strip_volatile_fields(new);
    if changed {
        debug!(kind, name = name_of(new), "Dependent spec changed");
    }
    changed
}
