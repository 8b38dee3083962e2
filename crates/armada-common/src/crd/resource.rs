//! Behavior shared by every Armada custom resource

use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};

use super::types::{ArmadaStatus, HelmResourceState};

/// Name fragment marking helper charts (e.g. helm-toolkit) that must never
/// be enabled automatically
pub const HELPER_CHART_MARKER: &str = "-htk";

/// Common accessors and lifecycle helpers for ArmadaChart, ArmadaChartGroup
/// and ArmadaManifest.
pub trait HelmResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Finalizer gating deletion of this kind until cleanup completes
    const FINALIZER: &'static str;

    /// Target state as stored in the spec, `None` when never set
    fn spec_target_state(&self) -> Option<HelmResourceState>;

    /// Overwrite the target state in the spec
    fn set_target_state(&mut self, state: HelmResourceState);

    /// Observed status, if any has been written
    fn armada_status(&self) -> Option<&ArmadaStatus>;

    /// Mutable status, created empty on first access
    fn armada_status_mut(&mut self) -> &mut ArmadaStatus;

    /// Target state an unset value stands for: `deployed`, except for helper
    /// charts whose name contains [`HELPER_CHART_MARKER`], which stay
    /// `uninitialized` so nothing enables them implicitly
    fn default_target_state(&self) -> HelmResourceState {
        if self.name_any().contains(HELPER_CHART_MARKER) {
            HelmResourceState::Uninitialized
        } else {
            HelmResourceState::Deployed
        }
    }

    /// Target state, reading an unset value as [`Self::default_target_state`]
    fn target_state(&self) -> HelmResourceState {
        self.spec_target_state()
            .unwrap_or_else(|| self.default_target_state())
    }

    /// Actual state, treating a missing status as uninitialized
    fn actual_state(&self) -> HelmResourceState {
        self.armada_status()
            .map(|s| s.actual_state)
            .unwrap_or(HelmResourceState::Uninitialized)
    }

    /// Fill in defaults and recompute `satisfied`.
    ///
    /// An unset target state is written as [`Self::default_target_state`],
    /// the same value every reader already assumes for it.
    ///
    /// Returns true when the target state was defaulted and needs persisting.
    fn init(&mut self) -> bool {
        let defaulted = if self.spec_target_state().is_none() {
            let state = self.default_target_state();
            self.set_target_state(state);
            true
        } else {
            false
        };

        let target = self.target_state();
        self.armada_status_mut().refresh_satisfied(target);
        defaulted
    }

    /// True once a deletion timestamp is set
    fn is_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// True when the resource is not (yet) managed by the reconciler
    fn is_target_state_uninitialized(&self) -> bool {
        self.target_state() == HelmResourceState::Uninitialized
    }

    /// True when the actual state meets the target state
    fn is_satisfied(&self) -> bool {
        self.target_state() == self.actual_state()
    }

    /// True when the actual state reports a failure
    fn is_failed_or_error(&self) -> bool {
        matches!(
            self.actual_state(),
            HelmResourceState::Failed | HelmResourceState::Error
        )
    }

    /// True when this kind's finalizer is present
    fn has_armada_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == Self::FINALIZER)
    }

    /// True when any owner reference is set
    fn has_owner(&self) -> bool {
        !self.owner_references().is_empty()
    }

    /// True when an owner reference points at the given UID
    fn is_owned_by(&self, owner_uid: &str) -> bool {
        self.owner_references().iter().any(|r| r.uid == owner_uid)
    }
}
