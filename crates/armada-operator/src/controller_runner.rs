//! Controller runner - builds one controller future per Armada kind
//!
//! Every controller reconciles on its own watch plus a trigger channel fed by
//! dependent watches: release dependents for charts, member kinds for groups
//! and manifests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use armada_common::crd::{ArmadaChart, ArmadaChartGroup, ArmadaManifest, HelmResource};
use armada_controller::watches::TRIGGER_BUFFER;
use armada_controller::{chart, chart_group, manifest, Context, DependentWatchRegistry};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be polled
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn api<K: HelmResource>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Build the chart, chart group and manifest controllers.
///
/// `build_context` receives the chart dependent-watch registry and returns
/// the context shared by all three controllers.
pub fn build_controllers(
    client: Client,
    watch_namespace: Option<String>,
    cancel: CancellationToken,
    build_context: impl FnOnce(Arc<DependentWatchRegistry<ArmadaChart>>) -> Context,
) -> Vec<ControllerFuture> {
    let namespace = watch_namespace.as_deref();

    let (chart_tx, chart_rx) = mpsc::channel(TRIGGER_BUFFER);
    let chart_watches = Arc::new(DependentWatchRegistry::<ArmadaChart>::new(
        client.clone(),
        watch_namespace.clone(),
        chart_tx,
        cancel.clone(),
    ));
    let ctx = Arc::new(build_context(chart_watches));

    let (group_tx, group_rx) = mpsc::channel(TRIGGER_BUFFER);
    DependentWatchRegistry::<ArmadaChartGroup>::new(
        client.clone(),
        watch_namespace.clone(),
        group_tx,
        cancel.clone(),
    )
    .watch_kind::<ArmadaChart>();

    let (manifest_tx, manifest_rx) = mpsc::channel(TRIGGER_BUFFER);
    DependentWatchRegistry::<ArmadaManifest>::new(
        client.clone(),
        watch_namespace.clone(),
        manifest_tx,
        cancel,
    )
    .watch_kind::<ArmadaChartGroup>();

    tracing::info!("- ArmadaChart controller");
    tracing::info!("- ArmadaChartGroup controller");
    tracing::info!("- ArmadaManifest controller");

    vec![
        Box::pin(
            Controller::new(
                api::<ArmadaChart>(&client, namespace),
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            )
            .reconcile_on(ReceiverStream::new(chart_rx))
            .shutdown_on_signal()
            .run(chart::reconcile, chart::error_policy, ctx.clone())
            .for_each(log_reconcile_result("ArmadaChart")),
        ),
        Box::pin(
            Controller::new(
                api::<ArmadaChartGroup>(&client, namespace),
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            )
            .reconcile_on(ReceiverStream::new(group_rx))
            .shutdown_on_signal()
            .run(chart_group::reconcile, chart_group::error_policy, ctx.clone())
            .for_each(log_reconcile_result("ArmadaChartGroup")),
        ),
        Box::pin(
            Controller::new(
                api::<ArmadaManifest>(&client, namespace),
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            )
            .reconcile_on(ReceiverStream::new(manifest_rx))
            .shutdown_on_signal()
            .run(manifest::reconcile, manifest::error_policy, ctx)
            .for_each(log_reconcile_result("ArmadaManifest")),
        ),
    ]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
