//! Kubernetes Event recording for Armada controllers.
//!
//! Every condition a reconciler records is mirrored as an Event on the
//! resource: the condition type becomes the event reason, and failure
//! conditions are published as warnings.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use crate::crd::{ConditionStatus, HelmResourceCondition};

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (the condition type)
    /// * `action` - What action was taken (e.g. "Install")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    ///
    /// `instance` is usually the operator pod name.
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event type for a condition: failures that hold are warnings
pub fn event_type_for(cond: &HelmResourceCondition) -> EventType {
    if cond.type_.is_failure() && cond.status == ConditionStatus::True {
        EventType::Warning
    } else {
        EventType::Normal
    }
}

/// Event note for a condition: its reason, followed by the message if any
pub fn event_note_for(cond: &HelmResourceCondition) -> Option<String> {
    let reason = cond.reason_str();
    match (reason.is_empty(), cond.message.is_empty()) {
        (true, true) => None,
        (false, true) => Some(reason),
        (true, false) => Some(cond.message.clone()),
        (false, false) => Some(format!("{reason}: {}", cond.message)),
    }
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Release or members installed
    pub const INSTALL: &str = "Install";
    /// Release or members updated
    pub const UPDATE: &str = "Update";
    /// Steady-state reconciliation
    pub const RECONCILE: &str = "Reconcile";
    /// Release or members removed
    pub const UNINSTALL: &str = "Uninstall";
}
