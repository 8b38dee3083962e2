//! Shared state handed to every reconcile

use std::sync::Arc;

use armada_common::config::OperatorConfig;
use armada_common::crd::{ArmadaChart, ArmadaChartGroup, ArmadaManifest, HelmResource};
use armada_common::events::{EventPublisher, KubeEventPublisher};
use armada_helm::ReleaseManagerFactory;
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::client::{KubeResourceClient, ResourceClient};
use crate::manager::ReleaseManagers;
use crate::watches::DependentWatches;

/// Controller context
///
/// Kubernetes, helm and event access all go through trait objects so tests
/// can run a reconcile against mocks.
pub struct Context {
    /// Operator settings
    pub config: OperatorConfig,
    /// ArmadaChart access
    pub charts: Arc<dyn ResourceClient<ArmadaChart>>,
    /// ArmadaChartGroup access
    pub groups: Arc<dyn ResourceClient<ArmadaChartGroup>>,
    /// ArmadaManifest access
    pub manifests: Arc<dyn ResourceClient<ArmadaManifest>>,
    /// Per-chart release managers
    pub releases: Arc<dyn ReleaseManagers>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Dependent watches of chart releases, `None` when not watching
    pub watches: Option<Arc<dyn DependentWatches>>,
    /// Cancelled on shutdown; each reconcile works on a child token
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: OperatorConfig) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context for testing with mock backends
    #[cfg(test)]
    pub fn for_testing(
        charts: Arc<dyn ResourceClient<ArmadaChart>>,
        groups: Arc<dyn ResourceClient<ArmadaChartGroup>>,
        manifests: Arc<dyn ResourceClient<ArmadaManifest>>,
        releases: Arc<dyn ReleaseManagers>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config: OperatorConfig::default(),
            charts,
            groups,
            manifests,
            releases,
            events,
            watches: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Client for the kind `K`
    pub fn client<K: ArmadaKind>(&self) -> Arc<dyn ResourceClient<K>> {
        K::client(self)
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    config: OperatorConfig,
    releases: Option<Arc<dyn ReleaseManagers>>,
    events: Option<Arc<dyn EventPublisher>>,
    watches: Option<Arc<dyn DependentWatches>>,
    cancel: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            client,
            config,
            releases: None,
            events: None,
            watches: None,
            cancel: None,
        }
    }

    /// Override the release manager factory
    pub fn releases(mut self, releases: Arc<dyn ReleaseManagers>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register dependent watches for chart releases
    pub fn watches(mut self, watches: Arc<dyn DependentWatches>) -> Self {
        self.watches = Some(watches);
        self
    }

    /// Root cancellation token
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let manager = self.config.operator_name.clone();
        Context {
            charts: Arc::new(KubeResourceClient::new(self.client.clone(), &manager)),
            groups: Arc::new(KubeResourceClient::new(self.client.clone(), &manager)),
            manifests: Arc::new(KubeResourceClient::new(self.client.clone(), &manager)),
            releases: self.releases.unwrap_or_else(|| {
                Arc::new(ReleaseManagerFactory::from_config(self.client.clone(), &self.config))
            }),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(
                    self.client.clone(),
                    &manager,
                    self.config.pod_name.clone(),
                ))
            }),
            watches: self.watches,
            cancel: self.cancel.unwrap_or_default(),
            config: self.config,
        }
    }
}

/// An Armada kind reachable through the [`Context`]
pub trait ArmadaKind: HelmResource {
    /// Client for this kind
    fn client(ctx: &Context) -> Arc<dyn ResourceClient<Self>>;
}

impl ArmadaKind for ArmadaChart {
    fn client(ctx: &Context) -> Arc<dyn ResourceClient<Self>> {
        ctx.charts.clone()
    }
}

impl ArmadaKind for ArmadaChartGroup {
    fn client(ctx: &Context) -> Arc<dyn ResourceClient<Self>> {
        ctx.groups.clone()
    }
}

impl ArmadaKind for ArmadaManifest {
    fn client(ctx: &Context) -> Arc<dyn ResourceClient<Self>> {
        ctx.manifests.clone()
    }
}
