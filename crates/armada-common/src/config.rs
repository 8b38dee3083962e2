//! Operator configuration
//!
//! Settings come from environment variables (set by the Deployment and the
//! downward API) and can be overridden from the command line. Reading goes
//! through [`EnvSource`] so tests never touch process-global state.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::Error;

/// Namespace to watch, empty or unset for all namespaces
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
/// Name reported on events and used as field manager
pub const OPERATOR_NAME_ENV: &str = "OPERATOR_NAME";
/// Pod name of the running operator
pub const POD_NAME_ENV: &str = "POD_NAME";
/// Requeue delay in milliseconds
pub const RECONCILE_PERIOD_ENV: &str = "ARMADA_RECONCILE_PERIOD_MS";
/// Path of the helm binary
pub const HELM_BIN_ENV: &str = "ARMADA_HELM_BIN";
/// Path of the git binary
pub const GIT_BIN_ENV: &str = "ARMADA_GIT_BIN";
/// Directory holding bundled charts such as helm-toolkit
pub const CHARTS_DIR_ENV: &str = "ARMADA_CHARTS_DIR";
/// Default helm timeout in seconds
pub const HELM_TIMEOUT_ENV: &str = "ARMADA_HELM_TIMEOUT_SECS";

/// Default operator name
pub const DEFAULT_OPERATOR_NAME: &str = "armada-operator";
/// Default requeue delay
pub const DEFAULT_RECONCILE_PERIOD: Duration = Duration::from_millis(300);
/// Default bundled charts directory
pub const DEFAULT_CHARTS_DIR: &str = "/opt/armada/helm-charts";
/// Default helm timeout
pub const DEFAULT_HELM_TIMEOUT: Duration = Duration::from_secs(300);

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Source of environment configuration
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of an environment variable, `None` when unset
    fn var(&self, key: &str) -> Option<String>;

    /// Namespace the operator runs in, from the service account mount
    fn operator_namespace(&self) -> Option<String>;
}

/// Reads the process environment and the in-cluster service account files
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn operator_namespace(&self) -> Option<String> {
        let ns = std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE).ok()?;
        let ns = ns.trim().to_string();
        debug!(namespace = %ns, "Found operator namespace");
        (!ns.is_empty()).then_some(ns)
    }
}

/// Runtime configuration of the operator
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Namespace to watch, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Name used for events and server-side apply
    pub operator_name: String,
    /// Pod name, reported as the event instance
    pub pod_name: Option<String>,
    /// Namespace the operator runs in, when running in-cluster
    pub operator_namespace: Option<String>,
    /// Requeue delay after install/update and while children are not ready
    pub reconcile_period: Duration,
    /// helm executable
    pub helm_bin: PathBuf,
    /// git executable
    pub git_bin: PathBuf,
    /// Directory holding bundled charts
    pub charts_dir: PathBuf,
    /// Helm timeout used when a chart sets none
    pub helm_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            operator_name: DEFAULT_OPERATOR_NAME.to_string(),
            pod_name: None,
            operator_namespace: None,
            reconcile_period: DEFAULT_RECONCILE_PERIOD,
            helm_bin: PathBuf::from("helm"),
            git_bin: PathBuf::from("git"),
            charts_dir: PathBuf::from(DEFAULT_CHARTS_DIR),
            helm_timeout: DEFAULT_HELM_TIMEOUT,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_source(&OsEnv)
    }

    /// Load configuration from an arbitrary source
    pub fn from_source(env: &dyn EnvSource) -> Result<Self, Error> {
        let mut config = Self::default();

        config.watch_namespace = non_empty(env.var(WATCH_NAMESPACE_ENV));
        if let Some(name) = non_empty(env.var(OPERATOR_NAME_ENV)) {
            config.operator_name = name;
        }
        config.pod_name = non_empty(env.var(POD_NAME_ENV));
        config.operator_namespace = env.operator_namespace();

        if let Some(ms) = non_empty(env.var(RECONCILE_PERIOD_ENV)) {
            config.reconcile_period = Duration::from_millis(parse_u64(RECONCILE_PERIOD_ENV, &ms)?);
        }
        if let Some(bin) = non_empty(env.var(HELM_BIN_ENV)) {
            config.helm_bin = PathBuf::from(bin);
        }
        if let Some(bin) = non_empty(env.var(GIT_BIN_ENV)) {
            config.git_bin = PathBuf::from(bin);
        }
        if let Some(dir) = non_empty(env.var(CHARTS_DIR_ENV)) {
            config.charts_dir = PathBuf::from(dir);
        }
        if let Some(secs) = non_empty(env.var(HELM_TIMEOUT_ENV)) {
            config.helm_timeout = Duration::from_secs(parse_u64(HELM_TIMEOUT_ENV, &secs)?);
        }

        Ok(config)
    }

    /// Override the watched namespace; an empty string means all namespaces
    pub fn with_watch_namespace(mut self, namespace: Option<String>) -> Self {
        if let Some(ns) = namespace {
            self.watch_namespace = non_empty(Some(ns));
        }
        self
    }

    /// Override the requeue delay
    pub fn with_reconcile_period(mut self, period: Duration) -> Self {
        self.reconcile_period = period;
        self
    }

    /// Override the bundled charts directory
    pub fn with_charts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.charts_dir = dir.into();
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::validation_for(key, format!("expected an integer, got {value:?}")))
}
