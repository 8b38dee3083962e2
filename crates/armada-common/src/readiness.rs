//! Readiness and status-change detection for Helm-rendered objects
//!
//! Only a few kinds have a meaningful notion of "done": pods report a Ready
//! condition, jobs count successes and Argo workflows expose a phase.
//! Everything else is considered ready as soon as it exists.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;

/// Kinds with a dedicated readiness rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependentKind {
    /// core/v1 Pod
    Pod,
    /// batch/v1 Job
    Job,
    /// argoproj.io Workflow
    Workflow,
    /// Any other kind
    Other,
}

impl DependentKind {
    /// Resolve from a Kubernetes kind string
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Pod" => Self::Pod,
            "Job" => Self::Job,
            "Workflow" => Self::Workflow,
            _ => Self::Other,
        }
    }

    /// Resolve from the `kind` field of a raw object
    pub fn of(obj: &Value) -> Self {
        Self::from_kind(obj.get("kind").and_then(|k| k.as_str()).unwrap_or_default())
    }

    /// Whether the object has reached its terminal good state
    pub fn is_ready(&self, obj: &Value) -> bool {
        match self {
            Self::Pod => pod_ready_status(obj).as_deref() == Some("True"),
            Self::Job => job_succeeded(obj).is_some_and(|n| n > 0),
            Self::Workflow => extract_field(obj, "status.phase") == "Succeeded",
            Self::Other => true,
        }
    }

    /// Whether the readiness-relevant part of the status differs
    pub fn status_changed(&self, old: &Value, new: &Value) -> bool {
        match self {
            Self::Pod => pod_ready_status(old) != pod_ready_status(new),
            Self::Job => job_succeeded(old) != job_succeeded(new),
            Self::Workflow => {
                extract_field(old, "status.phase") != extract_field(new, "status.phase")
            }
            Self::Other => false,
        }
    }
}

/// Readiness of a raw object, dispatched on its kind
pub fn is_object_ready(obj: &Value) -> bool {
    DependentKind::of(obj).is_ready(obj)
}

/// Status change between two observations of an object.
///
/// A missing observation counts as a change. Objects of different kinds
/// are never considered changed.
pub fn object_status_changed(old: Option<&Value>, new: Option<&Value>) -> bool {
    let (Some(old), Some(new)) = (old, new) else {
        return true;
    };
    let kind = DependentKind::of(old);
    if kind != DependentKind::of(new) {
        return false;
    }
    kind.status_changed(old, new)
}

/// Read a dotted path of string fields, e.g. `status.phase`.
///
/// Returns an empty string when any segment is missing or the leaf is not
/// a string.
pub fn extract_field(obj: &Value, path: &str) -> String {
    path.split('.')
        .try_fold(obj, |cur, key| cur.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn pod_ready_status(obj: &Value) -> Option<String> {
    let pod: Pod = serde_json::from_value(obj.clone()).ok()?;
    pod.status?
        .conditions?
        .into_iter()
        .find(|c| c.type_ == "Ready")
        .map(|c| c.status)
}

fn job_succeeded(obj: &Value) -> Option<i32> {
    let job: Job = serde_json::from_value(obj.clone()).ok()?;
    Some(job.status.and_then(|s| s.succeeded).unwrap_or(0))
}
