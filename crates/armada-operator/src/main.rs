//! Armada Operator - deploys Helm releases from Armada manifests

use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use armada_common::config::OperatorConfig;
use armada_common::telemetry::{init_telemetry, TelemetryConfig};
use armada_controller::Context;
use armada_operator::controller_runner::build_controllers;
use armada_operator::startup::{crds_yaml, ensure_crds_installed};

/// Armada - deploy ordered groups of Helm charts from ArmadaManifest resources
#[derive(Parser, Debug)]
#[command(name = "armada-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Namespace to watch, all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE", global = true)]
    watch_namespace: Option<String>,

    /// Requeue delay in milliseconds while releases come up
    #[arg(long, env = "ARMADA_RECONCILE_PERIOD_MS", global = true)]
    reconcile_period_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Reconciles ArmadaChart, ArmadaChartGroup and ArmadaManifest resources
    /// until SIGTERM or Ctrl+C.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {e}"))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli).await,
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let mut config = OperatorConfig::from_env()?.with_watch_namespace(cli.watch_namespace);
    if let Some(ms) = cli.reconcile_period_ms {
        config = config.with_reconcile_period(Duration::from_millis(ms));
    }
    tracing::info!(
        operator = %config.operator_name,
        watch_namespace = ?config.watch_namespace,
        reconcile_period = ?config.reconcile_period,
        "Starting Armada operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {e}"))?;

    ensure_crds_installed(&client, &config.operator_name).await?;

    let cancel = CancellationToken::new();
    let watch_namespace = config.watch_namespace.clone();
    let ctx_client = client.clone();
    let ctx_cancel = cancel.clone();
    let controllers = build_controllers(client, watch_namespace, cancel.clone(), move |watches| {
        Context::builder(ctx_client, config)
            .watches(watches)
            .cancel(ctx_cancel)
            .build()
    });

    tracing::info!("Armada controllers started");
    futures::future::join_all(controllers).await;

    // Stop dependent watches and kill any helm process still running
    cancel.cancel();
    tracing::info!("Armada operator stopped");
    Ok(())
}
