//! Release manager for a single ArmadaChart
//!
//! A [`ChartReleaseManager`] lives for one reconcile. `sync` observes the
//! release, the remaining operations act on it. Every helm call carries the
//! reconcile's cancellation token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use armada_common::config::OperatorConfig;
use armada_common::crd::{ArmadaChart, ArmadaChartSpec};
use armada_common::kube_utils::split_manifest;
use armada_common::{Error, ManagerResult};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dependents::KubeDependentClient;
use crate::helm::{timeout_or, HelmCli, HelmClient, ReleaseRequest};
use crate::process::CallContext;
use crate::release::{DependentClient, HelmRelease};
use crate::source::{ChartSourceResolver, CliSourceFetcher};

/// Builds a [`ChartReleaseManager`] per reconcile from shared backends
#[derive(Clone)]
pub struct ReleaseManagerFactory {
    helm: Arc<dyn HelmClient>,
    resolver: Arc<ChartSourceResolver>,
    dependents: Arc<dyn DependentClient>,
    default_timeout: Duration,
}

impl ReleaseManagerFactory {
    /// Assemble a factory from its parts
    pub fn new(
        helm: Arc<dyn HelmClient>,
        resolver: Arc<ChartSourceResolver>,
        dependents: Arc<dyn DependentClient>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            helm,
            resolver,
            dependents,
            default_timeout,
        }
    }

    /// Production wiring: the helm and git executables named in `config`
    /// and the dynamic Kubernetes API
    pub fn from_config(client: Client, config: &OperatorConfig) -> Self {
        let fetcher = CliSourceFetcher::new(&config.git_bin, &config.helm_bin);
        Self::new(
            Arc::new(HelmCli::new(&config.helm_bin)),
            Arc::new(ChartSourceResolver::new(&config.charts_dir, Arc::new(fetcher))),
            Arc::new(KubeDependentClient::new(client)),
            config.helm_timeout,
        )
    }

    /// Manager for one reconcile of `chart`
    pub fn manager_for(&self, chart: &ArmadaChart, cancel: CancellationToken) -> ChartReleaseManager {
        let namespace = chart
            .spec
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| chart.namespace())
            .unwrap_or_else(|| "default".to_string());
        ChartReleaseManager {
            helm: self.helm.clone(),
            resolver: self.resolver.clone(),
            dependents: self.dependents.clone(),
            release_name: chart.spec.release.clone(),
            namespace,
            spec: chart.spec.clone(),
            default_timeout: self.default_timeout,
            cancel,
            chart_path: None,
            deployed: None,
            is_installed: false,
            is_update_required: false,
        }
    }
}

/// Release operations for one ArmadaChart
pub struct ChartReleaseManager {
    helm: Arc<dyn HelmClient>,
    resolver: Arc<ChartSourceResolver>,
    dependents: Arc<dyn DependentClient>,
    release_name: String,
    namespace: String,
    spec: ArmadaChartSpec,
    default_timeout: Duration,
    cancel: CancellationToken,
    chart_path: Option<PathBuf>,
    deployed: Option<HelmRelease>,
    is_installed: bool,
    is_update_required: bool,
}

impl ChartReleaseManager {
    /// Name of the managed release
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    /// Namespace the release is installed into
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether `sync` found a release
    pub fn is_installed(&self) -> bool {
        self.is_installed
    }

    /// Whether `sync` found the rendered chart differs from the release
    pub fn is_update_required(&self) -> bool {
        self.is_update_required
    }

    /// Release found by `sync`
    pub fn deployed_release(&self) -> Option<&HelmRelease> {
        self.deployed.as_ref()
    }

    fn ctx(&self, seconds: Option<u64>) -> CallContext {
        CallContext::new(timeout_or(seconds, self.default_timeout), self.cancel.clone())
    }

    fn deploy_ctx(&self) -> CallContext {
        self.ctx(self.spec.wait_timeout())
    }

    fn request(&self) -> Result<ReleaseRequest, Error> {
        let chart_path = self
            .chart_path
            .clone()
            .ok_or_else(|| Error::internal_with_context("release_request", "chart source not resolved"))?;
        Ok(ReleaseRequest {
            name: self.release_name.clone(),
            namespace: self.namespace.clone(),
            chart_path,
            values: self.spec.values.clone(),
            wait: self.spec.native_wait(),
            force: self.spec.force_upgrade(),
            no_hooks: self.spec.upgrade_no_hooks(),
            history_max: self.spec.revision_history_limit,
        })
    }

    fn unnamed(&self) -> HelmRelease {
        HelmRelease::named(&self.release_name, &self.namespace)
    }

    /// Resolve the chart, find the release and check whether it drifted.
    ///
    /// A failed release is uninstalled here, unless protected, so the next
    /// install starts clean.
    pub async fn sync(&mut self) -> Result<(), Error> {
        let ctx = self.deploy_ctx();
        let chart_path = self
            .resolver
            .resolve(&self.spec.source, &self.spec.dependencies, &ctx)
            .await?;
        self.chart_path = Some(chart_path);
        self.is_installed = false;
        self.is_update_required = false;
        self.deployed = None;

        let deployed = match self.helm.status(&self.release_name, &self.namespace, &ctx).await {
            Ok(release) => release,
            Err(e) if e.is_not_found() => {
                debug!(release = %self.release_name, "Release not installed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if deployed.status.is_pending() {
            return Err(Error::helm(
                "status",
                &self.release_name,
                "another operation is in progress",
            ));
        }

        if deployed.is_failed_or_error() && !self.spec.is_protected() {
            warn!(release = %self.release_name, version = deployed.version, "Purging failed release");
            match self.helm.uninstall(&self.release_name, &self.namespace, &ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        self.is_installed = true;
        let candidate = self.helm.upgrade(&self.request()?, true, &ctx).await?;
        self.is_update_required = deployed.manifest_differs(&candidate.manifest);
        if self.is_update_required {
            info!(release = %self.release_name, "Release manifest drifted from chart");
        }
        self.deployed = Some(deployed);
        Ok(())
    }

    /// Install the release, removing it again when the install fails
    pub async fn install_release(&self) -> ManagerResult<HelmRelease> {
        let req = match self.request() {
            Ok(req) => req,
            Err(e) => return ManagerResult::with_error(self.unnamed(), e),
        };
        let ctx = self.deploy_ctx();
        match self.helm.install(&req, &ctx).await {
            Ok(release) => self.run_tests(release).await,
            Err(err) => {
                if self.helm.status(&self.release_name, &self.namespace, &ctx).await.is_ok() {
                    if let Err(e) = self.helm.uninstall(&self.release_name, &self.namespace, &ctx).await {
                        let err = Error::helm(
                            "install",
                            &self.release_name,
                            format!("failed to roll back failed installation: {e}: {err}"),
                        );
                        return ManagerResult::with_error(self.unnamed(), err);
                    }
                }
                ManagerResult::with_error(self.unnamed(), err)
            }
        }
    }

    /// Upgrade the release, rolling back to the deployed revision on failure
    pub async fn update_release(&self) -> ManagerResult<HelmRelease> {
        let previous = self.deployed.clone().unwrap_or_else(|| self.unnamed());
        let req = match self.request() {
            Ok(req) => req,
            Err(e) => return ManagerResult::with_error(previous, e),
        };
        let ctx = self.deploy_ctx();
        match self.helm.upgrade(&req, false, &ctx).await {
            Ok(release) => self.run_tests(release).await,
            Err(err) if previous.version > 0 => {
                match self
                    .helm
                    .rollback(&self.release_name, &self.namespace, previous.version, &ctx)
                    .await
                {
                    Ok(()) => ManagerResult::with_error(previous, err),
                    Err(e) => {
                        let err = Error::helm(
                            "upgrade",
                            &self.release_name,
                            format!("failed to roll back failed update: {e}: {err}"),
                        );
                        ManagerResult::with_error(previous, err)
                    }
                }
            }
            Err(err) => ManagerResult::with_error(previous, err),
        }
    }

    /// Recreate objects of the deployed release that were deleted
    /// out-of-band. The deployed release is returned.
    pub async fn reconcile_release(&self) -> ManagerResult<HelmRelease> {
        let Some(deployed) = self.deployed.clone() else {
            return ManagerResult::with_error(self.unnamed(), Error::NotFound);
        };
        let docs = match split_manifest(&deployed.manifest) {
            Ok(docs) => docs,
            Err(e) => return ManagerResult::with_error(deployed, e),
        };

        let mut errors = Vec::new();
        for doc in &docs {
            if let Err(e) = self.dependents.restore(doc, &self.namespace).await {
                warn!(release = %self.release_name, error = %e, "Failed to restore release object");
                errors.push(e);
            }
        }
        ManagerResult::from_errors(deployed, errors)
    }

    /// Uninstall the release
    pub async fn uninstall_release(&self) -> ManagerResult<HelmRelease> {
        let ctx = self.ctx(self.spec.delete_timeout());
        let release = self.deployed.clone().unwrap_or_else(|| self.unnamed());
        match self.helm.uninstall(&self.release_name, &self.namespace, &ctx).await {
            Ok(()) => ManagerResult::ok(release),
            Err(e) => ManagerResult::with_error(release, e.normalize_not_found()),
        }
    }

    /// Whether every object of `release` is ready
    pub async fn is_release_ready(&self, release: &HelmRelease) -> Result<bool, Error> {
        release.is_ready(self.dependents.as_ref()).await
    }

    async fn run_tests(&self, release: HelmRelease) -> ManagerResult<HelmRelease> {
        if !self.spec.test_enabled() {
            return ManagerResult::ok(release);
        }
        let ctx = self.ctx(self.spec.test_timeout());
        match self.helm.test(&self.release_name, &self.namespace, &ctx).await {
            Ok(()) => {
                info!(release = %self.release_name, "Release tests passed");
                ManagerResult::ok(release)
            }
            Err(e) => ManagerResult::with_error(release, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::MockHelmClient;
    use crate::release::{MockDependentClient, ReleaseStatus};
    use crate::source::MockSourceFetcher;
    use armada_common::crd::{
        ArmadaChartSource, ArmadaProtectedRelease, ArmadaTest, ArmadaWait,
    };

    const DEPLOYED: &str = r#"{"name":"mariadb-release","namespace":"openstack","version":2,
        "info":{"status":"deployed"},
        "manifest":"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: mariadb-etc\n"}"#;

    fn deployed() -> HelmRelease {
        HelmRelease::from_json(DEPLOYED).unwrap()
    }

    fn chart(spec: impl FnOnce(&mut ArmadaChartSpec)) -> ArmadaChart {
        let mut s = ArmadaChartSpec {
            chart_name: "mariadb".to_string(),
            release: "mariadb-release".to_string(),
            source: ArmadaChartSource {
                location: "/opt/armada/helm-charts/mariadb".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        spec(&mut s);
        let mut chart = ArmadaChart::new("mariadb", s);
        chart.metadata.namespace = Some("openstack".to_string());
        chart
    }

    fn factory(helm: MockHelmClient, deps: MockDependentClient) -> ReleaseManagerFactory {
        ReleaseManagerFactory::new(
            Arc::new(helm),
            Arc::new(ChartSourceResolver::new(
                "/charts",
                Arc::new(MockSourceFetcher::new()),
            )),
            Arc::new(deps),
            Duration::from_secs(300),
        )
    }

    fn manager(helm: MockHelmClient, chart: &ArmadaChart) -> ChartReleaseManager {
        factory(helm, MockDependentClient::new()).manager_for(chart, CancellationToken::new())
    }

    mod sync {
        use super::*;

        #[tokio::test]
        async fn missing_release_is_not_installed() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Err(Error::NotFound));
            let mut mgr = manager(helm, &chart(|_| {}));
            mgr.sync().await.unwrap();
            assert!(!mgr.is_installed());
            assert!(!mgr.is_update_required());
        }

        #[tokio::test]
        async fn drifted_manifest_requires_update() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade().returning(|req, dry_run, _| {
                assert!(dry_run);
                assert_eq!(req.namespace, "openstack");
                Ok(deployed().with_manifest("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: other\n".into()))
            });
            let mut mgr = manager(helm, &chart(|_| {}));
            mgr.sync().await.unwrap();
            assert!(mgr.is_installed());
            assert!(mgr.is_update_required());
            assert_eq!(mgr.deployed_release().unwrap().version, 2);
        }

        #[tokio::test]
        async fn unchanged_manifest_needs_no_update() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade().returning(|_, _, _| Ok(deployed()));
            let mut mgr = manager(helm, &chart(|_| {}));
            mgr.sync().await.unwrap();
            assert!(mgr.is_installed());
            assert!(!mgr.is_update_required());
        }

        #[tokio::test]
        async fn failed_release_is_purged() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| {
                Ok(HelmRelease::from_json(r#"{"name":"mariadb-release","info":{"status":"failed"}}"#).unwrap())
            });
            helm.expect_uninstall().times(1).returning(|_, _, _| Ok(()));
            let mut mgr = manager(helm, &chart(|_| {}));
            mgr.sync().await.unwrap();
            assert!(!mgr.is_installed());
        }

        #[tokio::test]
        async fn protected_failed_release_is_kept() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| {
                let mut rel = deployed();
                rel.status = ReleaseStatus::Failed;
                Ok(rel)
            });
            helm.expect_uninstall().never();
            helm.expect_upgrade().returning(|_, _, _| Ok(deployed()));
            let protected = chart(|s| s.protected = Some(ArmadaProtectedRelease::default()));
            let mut mgr = manager(helm, &protected);
            mgr.sync().await.unwrap();
            assert!(mgr.is_installed());
            assert!(mgr.deployed_release().unwrap().is_failed_or_error());
        }

        #[tokio::test]
        async fn pending_release_fails_sync() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| {
                let mut rel = deployed();
                rel.status = ReleaseStatus::PendingUpgrade;
                Ok(rel)
            });
            let mut mgr = manager(helm, &chart(|_| {}));
            let err = mgr.sync().await.unwrap_err();
            assert!(err.is_retryable());
        }

        #[tokio::test]
        async fn release_namespace_overrides_resource_namespace() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, ns, _| {
                assert_eq!(ns, "osh-infra");
                Err(Error::NotFound)
            });
            let mut mgr = manager(helm, &chart(|s| s.namespace = Some("osh-infra".into())));
            mgr.sync().await.unwrap();
            assert_eq!(mgr.namespace(), "osh-infra");
        }
    }

    mod operations {
        use super::*;

        async fn synced(helm: MockHelmClient, chart: &ArmadaChart) -> ChartReleaseManager {
            let mut mgr = manager(helm, chart);
            mgr.sync().await.unwrap();
            mgr
        }

        #[tokio::test]
        async fn install_uses_wait_timeout_and_values() {
            let mut helm = MockHelmClient::new();
            helm.expect_status()
                .times(1)
                .returning(|_, _, _| Err(Error::NotFound));
            helm.expect_install().returning(|req, ctx| {
                assert!(req.wait);
                assert_eq!(ctx.timeout, Duration::from_secs(900));
                assert!(req.values.is_some());
                Ok(deployed())
            });
            let c = chart(|s| {
                s.values = Some(serde_json::json!({"replicas": 3}));
                s.wait = Some(ArmadaWait {
                    timeout: Some(900),
                    ..Default::default()
                });
            });
            let mgr = synced(helm, &c).await;
            let result = mgr.install_release().await;
            assert!(result.is_ok());
            assert_eq!(result.value.version, 2);
        }

        #[tokio::test]
        async fn failed_install_is_removed() {
            let mut helm = MockHelmClient::new();
            let mut seq = mockall::Sequence::new();
            helm.expect_status()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Err(Error::NotFound));
            helm.expect_install()
                .returning(|req, _| Err(Error::helm("install", &req.name, "timed out waiting")));
            helm.expect_status()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(deployed()));
            helm.expect_uninstall().times(1).returning(|_, _, _| Ok(()));
            let mgr = synced(helm, &chart(|_| {})).await;
            let result = mgr.install_release().await;
            assert!(result.error.unwrap().to_string().contains("timed out"));
        }

        #[tokio::test]
        async fn failed_update_rolls_back_to_deployed_revision() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade()
                .withf(|_, dry_run, _| *dry_run)
                .returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade()
                .withf(|_, dry_run, _| !*dry_run)
                .returning(|req, _, _| Err(Error::helm("upgrade", &req.name, "hook failed")));
            helm.expect_rollback()
                .withf(|_, _, revision, _| *revision == 2)
                .times(1)
                .returning(|_, _, _, _| Ok(()));
            let mgr = synced(helm, &chart(|_| {})).await;
            let result = mgr.update_release().await;
            assert!(!result.is_ok());
            assert_eq!(result.value.version, 2);
        }

        #[tokio::test]
        async fn tests_run_after_update_when_enabled() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade().returning(|_, _, _| Ok(deployed()));
            helm.expect_test().times(1).returning(|name, _, ctx| {
                assert_eq!(ctx.timeout, Duration::from_secs(120));
                Err(Error::helm("test", name, "1 test failed"))
            });
            let c = chart(|s| {
                s.test = Some(ArmadaTest {
                    enabled: true,
                    timeout: Some(120),
                    options: None,
                })
            });
            let mgr = synced(helm, &c).await;
            let result = mgr.update_release().await;
            assert!(result.error.is_some());
        }

        #[tokio::test]
        async fn uninstall_maps_missing_release_to_not_found() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Err(Error::NotFound));
            helm.expect_uninstall().returning(|_, _, _| Err(Error::NotFound));
            let mgr = synced(helm, &chart(|_| {})).await;
            let result = mgr.uninstall_release().await;
            assert!(result.is_not_found());
        }

        #[tokio::test]
        async fn reconcile_restores_missing_objects() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Ok(deployed()));
            helm.expect_upgrade().returning(|_, _, _| Ok(deployed()));
            let mut deps = MockDependentClient::new();
            deps.expect_restore().times(1).returning(|obj, ns| {
                assert_eq!(obj["metadata"]["name"], "mariadb-etc");
                assert_eq!(ns, "openstack");
                Ok(true)
            });
            let mut mgr = factory(helm, deps).manager_for(&chart(|_| {}), CancellationToken::new());
            mgr.sync().await.unwrap();
            let result = mgr.reconcile_release().await;
            assert!(result.is_ok());
            assert_eq!(result.value.name, "mariadb-release");
        }

        #[tokio::test]
        async fn reconcile_without_release_is_not_found() {
            let mut helm = MockHelmClient::new();
            helm.expect_status().returning(|_, _, _| Err(Error::NotFound));
            let mgr = synced(helm, &chart(|_| {})).await;
            assert!(mgr.reconcile_release().await.is_not_found());
        }

        #[tokio::test]
        async fn operations_before_sync_fail() {
            let mgr = manager(MockHelmClient::new(), &chart(|_| {}));
            let result = mgr.install_release().await;
            assert!(matches!(result.error, Some(Error::Internal { .. })));
        }
    }
}
