//! Supporting types shared by the Armada CRDs
//!
//! All three Armada kinds carry the same status shape: an actual state, a
//! derived `satisfied` flag and a list of Helm resource conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an Armada resource or its underlying Helm release
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HelmResourceState {
    /// State could not be determined
    Unknown,
    /// Resource exists but has not been acted upon
    #[default]
    Uninitialized,
    /// Resource has been picked up by the reconciler
    Initialized,
    /// Release operation is in flight
    Pending,
    /// Release is running but not yet ready
    Running,
    /// Release and all underlying resources are deployed
    Deployed,
    /// Release has been removed
    Uninstalled,
    /// Last release operation failed
    Failed,
    /// Resource could not be reconciled
    Error,
}

impl std::fmt::Display for HelmResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initialized => write!(f, "initialized"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Deployed => write!(f, "deployed"),
            Self::Uninstalled => write!(f, "uninstalled"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Type of a Helm resource condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The reconciler has initialized the resource
    Initialized,
    /// An install or update succeeded and resources are coming up
    Running,
    /// Underlying resources are deployed (True) or uninstalled (False)
    Deployed,
    /// A release operation failed
    Failed,
    /// Underlying resources report an error
    Error,
    /// The reconcile step itself failed
    Irreconcilable,
}

impl ConditionType {
    /// Whether a True condition of this type describes a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::Irreconcilable)
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::Running => write!(f, "Running"),
            Self::Deployed => write!(f, "Deployed"),
            Self::Failed => write!(f, "Failed"),
            Self::Error => write!(f, "Error"),
            Self::Irreconcilable => write!(f, "Irreconcilable"),
        }
    }
}

/// Machine-readable reason attached to a condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionReason {
    /// Install completed
    InstallSuccessful,
    /// Update completed
    UpdateSuccessful,
    /// Uninstall completed
    UninstallSuccessful,
    /// Install failed
    InstallError,
    /// Update failed
    UpdateError,
    /// Reconcile failed
    ReconcileError,
    /// Uninstall failed
    UninstallError,
    /// All underlying resources are ready
    UnderlyingResourcesReady,
    /// Underlying resources are in error
    UnderlyingResourcesError,
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InstallSuccessful => "InstallSuccessful",
            Self::UpdateSuccessful => "UpdateSuccessful",
            Self::UninstallSuccessful => "UninstallSuccessful",
            Self::InstallError => "InstallError",
            Self::UpdateError => "UpdateError",
            Self::ReconcileError => "ReconcileError",
            Self::UninstallError => "UninstallError",
            Self::UnderlyingResourcesReady => "UnderlyingResourcesReady",
            Self::UnderlyingResourcesError => "UnderlyingResourcesError",
        };
        f.write_str(s)
    }
}

/// Status condition of a Helm-backed resource
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmResourceCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Name of the release or child list the condition refers to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_name: String,

    /// Revision of the release the condition refers to
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resource_version: i32,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl HelmResourceCondition {
    /// Create a new condition with the current timestamp
    pub fn new(type_: ConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: String::new(),
            resource_name: String::new(),
            resource_version: 0,
            last_transition_time: Utc::now(),
        }
    }

    /// Set the reason
    pub fn reason(mut self, reason: ConditionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Set the human-readable message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the resource name and revision
    pub fn resource(mut self, name: impl Into<String>, version: i32) -> Self {
        self.resource_name = name.into();
        self.resource_version = version;
        self
    }

    /// Reason as a display string, empty when unset
    pub fn reason_str(&self) -> String {
        self.reason.map(|r| r.to_string()).unwrap_or_default()
    }
}

/// Conditions that decide the actual state when several are present, most
/// significant first
const STATE_PRECEDENCE: [(ConditionType, ConditionStatus); 7] = [
    (ConditionType::Irreconcilable, ConditionStatus::True),
    (ConditionType::Error, ConditionStatus::True),
    (ConditionType::Failed, ConditionStatus::True),
    (ConditionType::Running, ConditionStatus::True),
    (ConditionType::Deployed, ConditionStatus::True),
    (ConditionType::Deployed, ConditionStatus::False),
    (ConditionType::Initialized, ConditionStatus::True),
];

/// Actual state a condition stands for, if any
fn implied_state(cond: &HelmResourceCondition) -> Option<HelmResourceState> {
    match (cond.type_, cond.status) {
        (ConditionType::Deployed, ConditionStatus::True) => Some(HelmResourceState::Deployed),
        (ConditionType::Deployed, ConditionStatus::False) => Some(HelmResourceState::Uninstalled),
        (ConditionType::Running, ConditionStatus::True) => Some(HelmResourceState::Pending),
        (ConditionType::Failed, ConditionStatus::True) => Some(HelmResourceState::Failed),
        (ConditionType::Error | ConditionType::Irreconcilable, ConditionStatus::True) => {
            Some(HelmResourceState::Error)
        }
        (ConditionType::Initialized, ConditionStatus::True) => Some(HelmResourceState::Initialized),
        _ => None,
    }
}

/// Observed state shared by ArmadaChart, ArmadaChartGroup and ArmadaManifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaStatus {
    /// Actual state of the resource
    #[serde(default)]
    pub actual_state: HelmResourceState,

    /// True when the actual state matches the target state
    #[serde(default)]
    pub satisfied: bool,

    /// Reason of the last failure, cleared on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Conditions, at most one per type
    #[serde(default)]
    pub conditions: Vec<HelmResourceCondition>,
}

impl ArmadaStatus {
    /// Record a condition and recompute actual state and satisfaction
    ///
    /// A condition replaces any existing condition of the same type. The
    /// previous transition time is kept when the status did not change.
    pub fn set_condition(&mut self, mut cond: HelmResourceCondition, target: HelmResourceState) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == cond.type_) {
            if existing.status == cond.status {
                cond.last_transition_time = existing.last_transition_time;
            }
            *existing = cond.clone();
        } else {
            self.conditions.push(cond.clone());
        }
        self.compute_actual_state(&cond, target);
    }

    /// Remove the condition of the given type, if present.
    ///
    /// When the removed condition is what set the actual state, the state is
    /// derived again from the conditions left.
    pub fn remove_condition(&mut self, type_: ConditionType, target: HelmResourceState) {
        let Some(pos) = self.conditions.iter().position(|c| c.type_ == type_) else {
            return;
        };
        let removed = self.conditions.remove(pos);
        if implied_state(&removed) == Some(self.actual_state) {
            self.rederive_actual_state();
        }
        self.refresh_satisfied(target);
    }

    fn rederive_actual_state(&mut self) {
        let driving = STATE_PRECEDENCE.iter().find_map(|(type_, status)| {
            self.find_condition(*type_, *status).cloned()
        });
        match driving {
            Some(cond) => {
                self.actual_state = implied_state(&cond).unwrap_or_default();
                if cond.type_.is_failure() {
                    self.reason = cond.reason_str();
                } else {
                    self.reason.clear();
                }
            }
            None => {
                self.actual_state = HelmResourceState::Uninitialized;
                self.reason.clear();
            }
        }
    }

    /// Find a condition by type and status
    pub fn find_condition(
        &self,
        type_: ConditionType,
        status: ConditionStatus,
    ) -> Option<&HelmResourceCondition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == type_ && c.status == status)
    }

    /// Recompute `satisfied` against the target state
    pub fn refresh_satisfied(&mut self, target: HelmResourceState) {
        self.satisfied = self.actual_state == target;
    }

    fn compute_actual_state(&mut self, cond: &HelmResourceCondition, target: HelmResourceState) {
        match (cond.type_, cond.status) {
            (ConditionType::Deployed, ConditionStatus::True) => {
                self.actual_state = HelmResourceState::Deployed;
                self.reason.clear();
            }
            (ConditionType::Deployed, ConditionStatus::False) => {
                self.actual_state = HelmResourceState::Uninstalled;
                self.reason.clear();
            }
            (ConditionType::Running, ConditionStatus::True) => {
                self.actual_state = HelmResourceState::Pending;
                self.reason.clear();
            }
            (ConditionType::Failed, ConditionStatus::True) => {
                self.actual_state = HelmResourceState::Failed;
                self.reason = cond.reason_str();
            }
            (ConditionType::Error | ConditionType::Irreconcilable, ConditionStatus::True) => {
                self.actual_state = HelmResourceState::Error;
                self.reason = cond.reason_str();
            }
            (ConditionType::Initialized, ConditionStatus::True) => {
                if self.actual_state == HelmResourceState::Uninitialized {
                    self.actual_state = HelmResourceState::Initialized;
                }
            }
            _ => {}
        }
        self.refresh_satisfied(target);
    }
}
