//! ArmadaChart CRD types
//!
//! An `ArmadaChart` wraps a single Helm release: where the chart comes from,
//! the values to render it with, and how install, upgrade, test and delete
//! behave.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::HelmResource;
use super::types::{ArmadaStatus, HelmResourceState};

/// Finalizer held on an ArmadaChart until its release is uninstalled
pub const CHART_FINALIZER: &str = "uninstall-helm-release";

/// Where a chart is fetched from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartSourceType {
    /// Git repository cloned at `reference`
    Git,
    /// Tarball downloaded from a URL
    Tar,
    /// Directory already present on the operator's filesystem
    #[default]
    Local,
}

impl std::fmt::Display for ChartSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Tar => write!(f, "tar"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Location of a chart: a git repo, a tarball URL or a local directory
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaChartSource {
    /// Source type
    #[serde(rename = "type")]
    pub type_: ChartSourceType,

    /// URL or path of the source
    pub location: String,

    /// Path of the chart inside the fetched source
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subpath: String,

    /// Branch, tag or commit to check out (git only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,

    /// Authentication method for git, "SSH" or unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    /// HTTP proxy to use while fetching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_server: Option<String>,
}

/// Delete behavior
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaDelete {
    /// Time in seconds to wait for the uninstall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Upgrade options passed to helm
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaUpgradeOptions {
    /// Force resource updates through delete and recreate
    #[serde(default)]
    pub force: bool,

    /// Restart pods of the release (mapped to a forced upgrade)
    #[serde(default)]
    pub recreate_pods: bool,
}

/// Resources selected by type and labels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaResourceSelector {
    /// Resource type, e.g. `job` or `pod`
    #[serde(rename = "type")]
    pub type_: String,

    /// Label selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Actions run before an upgrade
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaUpgradePre {
    /// Resources deleted before the upgrade
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<ArmadaResourceSelector>,
}

/// Upgrade behavior
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaUpgrade {
    /// Skip chart hooks during upgrade
    #[serde(default)]
    pub no_hooks: bool,

    /// Pre-upgrade actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<ArmadaUpgradePre>,

    /// Upgrade options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ArmadaUpgradeOptions>,
}

/// Protection of failed releases
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaProtectedRelease {
    /// Continue processing when the release is protected and failed
    #[serde(default)]
    pub continue_processing: bool,
}

/// Options for helm test
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaTestOptions {
    /// Remove test pods after the run
    #[serde(default)]
    pub cleanup: bool,
}

/// Release test behavior
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaTest {
    /// Run `helm test` after install and upgrade
    #[serde(default)]
    pub enabled: bool,

    /// Time in seconds allotted to the test run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Test options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ArmadaTestOptions>,
}

/// Native helm wait toggle
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaWaitNative {
    /// Pass `--wait` to helm
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ArmadaWaitNative {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Wait behavior for install and upgrade
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArmadaWait {
    /// Time in seconds allotted for the release to become ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Resources to wait for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ArmadaResourceSelector>,

    /// Labels selecting the resources to wait for
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Native helm wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<ArmadaWaitNative>,
}

fn free_form_values(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schema)
}

/// A single Helm chart deployed as one release
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "armada.airshipit.org",
    version = "v1alpha1",
    kind = "ArmadaChart",
    plural = "armadacharts",
    shortname = "act",
    namespaced,
    status = "ArmadaStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.actual_state","description":"State"}"#,
    printcolumn = r#"{"name":"Target State","type":"string","jsonPath":".spec.target_state","description":"Target State"}"#,
    printcolumn = r#"{"name":"Satisfied","type":"boolean","jsonPath":".status.satisfied","description":"Satisfied"}"#
)]
pub struct ArmadaChartSpec {
    /// Name of the chart
    pub chart_name: String,

    /// Namespace the release is installed into (defaults to the resource namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the release
    pub release: String,

    /// Where to fetch the chart from
    pub source: ArmadaChartSource,

    /// Charts this chart depends on (copied in before install)
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Values overriding the chart defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form_values")]
    pub values: Option<serde_json::Value>,

    /// Delete behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<ArmadaDelete>,

    /// Upgrade behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<ArmadaUpgrade>,

    /// Keep FAILED releases instead of purging them before retrying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<ArmadaProtectedRelease>,

    /// Release test behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<ArmadaTest>,

    /// Deprecated deploy timeout in seconds, superseded by `wait.timeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Wait behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<ArmadaWait>,

    /// Target state of the release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_state: Option<HelmResourceState>,

    /// Number of revisions kept in the release history
    #[serde(
        default,
        rename = "revisionHistoryLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_history_limit: Option<i32>,
}

impl ArmadaChartSpec {
    /// Wait timeout in seconds, honoring the deprecated top-level field
    pub fn wait_timeout(&self) -> Option<u64> {
        self.wait
            .as_ref()
            .and_then(|w| w.timeout)
            .or(self.timeout)
    }

    /// Whether helm should block until resources are ready, on by default
    pub fn native_wait(&self) -> bool {
        self.wait
            .as_ref()
            .and_then(|w| w.native.as_ref())
            .map(|n| n.enabled)
            .unwrap_or(true)
    }

    /// Uninstall timeout in seconds
    pub fn delete_timeout(&self) -> Option<u64> {
        self.delete.as_ref().and_then(|d| d.timeout)
    }

    /// Release test timeout in seconds
    pub fn test_timeout(&self) -> Option<u64> {
        self.test.as_ref().and_then(|t| t.timeout)
    }

    /// Whether the upgrade should force resource updates
    pub fn force_upgrade(&self) -> bool {
        self.upgrade
            .as_ref()
            .and_then(|u| u.options.as_ref())
            .is_some_and(|o| o.force || o.recreate_pods)
    }

    /// Whether chart hooks are skipped on upgrade
    pub fn upgrade_no_hooks(&self) -> bool {
        self.upgrade.as_ref().is_some_and(|u| u.no_hooks)
    }

    /// Whether a failed release is kept instead of purged before retrying
    pub fn is_protected(&self) -> bool {
        self.protected.is_some()
    }

    /// Whether a release test runs after install and upgrade
    pub fn test_enabled(&self) -> bool {
        self.test.as_ref().is_some_and(|t| t.enabled)
    }
}

impl HelmResource for ArmadaChart {
    const FINALIZER: &'static str = CHART_FINALIZER;

    fn spec_target_state(&self) -> Option<HelmResourceState> {
        self.spec.target_state
    }

    fn set_target_state(&mut self, state: HelmResourceState) {
        self.spec.target_state = Some(state);
    }

    fn armada_status(&self) -> Option<&ArmadaStatus> {
        self.status.as_ref()
    }

    fn armada_status_mut(&mut self) -> &mut ArmadaStatus {
        self.status.get_or_insert_with(ArmadaStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn chart(name: &str, target: Option<HelmResourceState>) -> ArmadaChart {
        let mut chart = ArmadaChart::new(
            name,
            ArmadaChartSpec {
                chart_name: name.to_string(),
                release: format!("{name}-release"),
                target_state: target,
                ..Default::default()
            },
        );
        chart.metadata.namespace = Some("default".to_string());
        chart
    }

    mod init {
        use super::*;

        #[test]
        fn unset_target_defaults_to_deployed() {
            let mut act = chart("mariadb", None);
            assert!(act.init());
            assert_eq!(act.spec.target_state, Some(HelmResourceState::Deployed));
            assert_eq!(act.actual_state(), HelmResourceState::Uninitialized);
            assert!(!act.armada_status().unwrap().satisfied);
        }

        #[test]
        fn unset_target_reads_as_its_default_before_init() {
            let act = chart("mariadb", None);
            assert_eq!(act.target_state(), HelmResourceState::Deployed);
            assert!(!act.is_target_state_uninitialized());
            assert!(chart("openstack-htk", None).is_target_state_uninitialized());
        }

        #[test]
        fn helper_chart_stays_uninitialized() {
            let mut act = chart("openstack-htk", None);
            assert!(act.init());
            assert_eq!(
                act.spec.target_state,
                Some(HelmResourceState::Uninitialized)
            );
            // uninitialized == uninitialized
            assert!(act.armada_status().unwrap().satisfied);
        }

        #[test]
        fn explicit_target_is_kept() {
            let mut act = chart("keystone-htk", Some(HelmResourceState::Deployed));
            assert!(!act.init());
            assert_eq!(act.spec.target_state, Some(HelmResourceState::Deployed));
        }
    }

    #[test]
    fn spec_wire_format_uses_snake_case() {
        let yaml = r#"
chart_name: mariadb
release: mariadb
source:
  type: git
  location: https://opendev.org/openstack/openstack-helm
  subpath: mariadb
  reference: master
dependencies: [helm-toolkit]
values:
  pod:
    replicas:
      server: 1
wait:
  timeout: 600
  native:
    enabled: false
target_state: deployed
revisionHistoryLimit: 5
"#;
        let spec: ArmadaChartSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.source.type_, ChartSourceType::Git);
        assert_eq!(spec.source.subpath, "mariadb");
        assert_eq!(spec.dependencies, vec!["helm-toolkit".to_string()]);
        assert_eq!(spec.wait_timeout(), Some(600));
        assert!(!spec.native_wait());
        assert_eq!(spec.revision_history_limit, Some(5));
        assert_eq!(spec.target_state, Some(HelmResourceState::Deployed));
        assert_eq!(spec.values.unwrap()["pod"]["replicas"]["server"], 1);
    }

    #[test]
    fn deprecated_timeout_is_fallback() {
        let spec = ArmadaChartSpec {
            timeout: Some(120),
            ..Default::default()
        };
        assert_eq!(spec.wait_timeout(), Some(120));
    }

    #[test]
    fn option_helpers_default_sensibly() {
        let spec = ArmadaChartSpec::default();
        assert!(spec.native_wait());
        assert!(!spec.test_enabled());
        assert!(!spec.force_upgrade());
        assert!(!spec.upgrade_no_hooks());
        assert!(!spec.is_protected());
        assert!(spec.delete_timeout().is_none());

        let spec = ArmadaChartSpec {
            upgrade: Some(ArmadaUpgrade {
                no_hooks: true,
                options: Some(ArmadaUpgradeOptions {
                    force: false,
                    recreate_pods: true,
                }),
                ..Default::default()
            }),
            protected: Some(ArmadaProtectedRelease::default()),
            ..Default::default()
        };
        assert!(spec.force_upgrade());
        assert!(spec.upgrade_no_hooks());
        assert!(spec.is_protected());
    }

    #[test]
    fn crd_has_status_and_short_name() {
        let crd = ArmadaChart::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("armadacharts.armada.airshipit.org"));
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["act".to_string()])
        );
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().unwrap().status.is_some());
        assert_eq!(version.additional_printer_columns.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn finalizer_detection() {
        let mut act = chart("mariadb", None);
        assert!(!act.has_armada_finalizer());
        act.metadata.finalizers = Some(vec![CHART_FINALIZER.to_string()]);
        assert!(act.has_armada_finalizer());
    }
}
