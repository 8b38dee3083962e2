//! Chart-level manager seam
//!
//! The chart reconciler drives a Helm release rather than member resources.
//! These traits put the helm backend behind a mockable boundary.

use armada_common::crd::ArmadaChart;
use armada_common::{Error, ManagerResult};
use armada_helm::{ChartReleaseManager, HelmRelease, ReleaseManagerFactory};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

/// Release operations for one reconcile of one chart
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    /// Name of the managed release
    fn release_name(&self) -> String;

    /// Whether `sync` found a release
    fn is_installed(&self) -> bool;

    /// Whether `sync` found the chart drifted from the release
    fn is_update_required(&self) -> bool;

    /// Observe the release
    async fn sync(&mut self) -> Result<(), Error>;

    /// Install the release
    async fn install_release(&self) -> ManagerResult<HelmRelease>;

    /// Upgrade the release
    async fn update_release(&self) -> ManagerResult<HelmRelease>;

    /// Restore the deployed release's objects
    async fn reconcile_release(&self) -> ManagerResult<HelmRelease>;

    /// Uninstall the release
    async fn uninstall_release(&self) -> ManagerResult<HelmRelease>;

    /// Whether every object of the release is ready
    async fn is_release_ready(&self, release: &HelmRelease) -> Result<bool, Error>;
}

/// Builds a [`ReleaseManager`] per reconcile
#[cfg_attr(test, automock)]
pub trait ReleaseManagers: Send + Sync {
    /// Manager for `chart`, cancelled through `cancel`
    fn manager_for(&self, chart: &ArmadaChart, cancel: CancellationToken) -> Box<dyn ReleaseManager>;
}

#[async_trait]
impl ReleaseManager for ChartReleaseManager {
    fn release_name(&self) -> String {
        ChartReleaseManager::release_name(self).to_string()
    }

    fn is_installed(&self) -> bool {
        ChartReleaseManager::is_installed(self)
    }

    fn is_update_required(&self) -> bool {
        ChartReleaseManager::is_update_required(self)
    }

    async fn sync(&mut self) -> Result<(), Error> {
        ChartReleaseManager::sync(self).await
    }

    async fn install_release(&self) -> ManagerResult<HelmRelease> {
        ChartReleaseManager::install_release(self).await
    }

    async fn update_release(&self) -> ManagerResult<HelmRelease> {
        ChartReleaseManager::update_release(self).await
    }

    async fn reconcile_release(&self) -> ManagerResult<HelmRelease> {
        ChartReleaseManager::reconcile_release(self).await
    }

    async fn uninstall_release(&self) -> ManagerResult<HelmRelease> {
        ChartReleaseManager::uninstall_release(self).await
    }

    async fn is_release_ready(&self, release: &HelmRelease) -> Result<bool, Error> {
        ChartReleaseManager::is_release_ready(self, release).await
    }
}

impl ReleaseManagers for ReleaseManagerFactory {
    fn manager_for(&self, chart: &ArmadaChart, cancel: CancellationToken) -> Box<dyn ReleaseManager> {
        Box::new(ReleaseManagerFactory::manager_for(self, chart, cancel))
    }
}
