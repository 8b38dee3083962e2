//! Helm client abstraction
//!
//! [`HelmClient`] is the seam between the release manager and Helm.
//! [`HelmCli`] drives the `helm` executable. Chart rendering, hooks and
//! release storage all stay in Helm.

use std::path::{Path, PathBuf};
use std::time::Duration;

use armada_common::Error;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::process::{self, helm_duration, CallContext, ProcessFailure};
use crate::release::HelmRelease;

/// Everything needed to install or upgrade a release
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReleaseRequest {
    /// Release name
    pub name: String,
    /// Namespace the release lives in
    pub namespace: String,
    /// Local path of the chart
    pub chart_path: PathBuf,
    /// Values overriding the chart defaults, passed on stdin
    pub values: Option<serde_json::Value>,
    /// Pass `--wait`
    pub wait: bool,
    /// Force resource updates (upgrade only)
    pub force: bool,
    /// Skip hooks (upgrade only)
    pub no_hooks: bool,
    /// `--history-max`
    pub history_max: Option<i32>,
}

/// Operations on Helm releases
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Latest revision of a release, [`Error::NotFound`] when absent
    async fn status(&self, name: &str, namespace: &str, ctx: &CallContext)
        -> Result<HelmRelease, Error>;

    /// Rendered manifest of the latest revision
    async fn manifest(&self, name: &str, namespace: &str, ctx: &CallContext)
        -> Result<String, Error>;

    /// Install a new release
    async fn install(&self, req: &ReleaseRequest, ctx: &CallContext) -> Result<HelmRelease, Error>;

    /// Upgrade a release, or render the upgrade when `dry_run` is set
    async fn upgrade(
        &self,
        req: &ReleaseRequest,
        dry_run: bool,
        ctx: &CallContext,
    ) -> Result<HelmRelease, Error>;

    /// Uninstall a release, [`Error::NotFound`] when absent
    async fn uninstall(&self, name: &str, namespace: &str, ctx: &CallContext) -> Result<(), Error>;

    /// Run the release's test hooks
    async fn test(&self, name: &str, namespace: &str, ctx: &CallContext) -> Result<(), Error>;

    /// Roll a release back to a revision
    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        revision: i32,
        ctx: &CallContext,
    ) -> Result<(), Error>;

    /// Client version string
    async fn version(&self, ctx: &CallContext) -> Result<String, Error>;
}

/// [`HelmClient`] backed by the `helm` executable
#[derive(Clone, Debug)]
pub struct HelmCli {
    helm_bin: PathBuf,
}

impl HelmCli {
    /// Use the given helm executable
    pub fn new(helm_bin: impl Into<PathBuf>) -> Self {
        Self {
            helm_bin: helm_bin.into(),
        }
    }

    async fn run(
        &self,
        operation: &str,
        release: &str,
        args: Vec<String>,
        stdin: Option<String>,
        ctx: &CallContext,
    ) -> Result<String, Error> {
        debug!(operation, release, ?args, "Running helm");
        process::run(&self.helm_bin, &args, stdin, ctx)
            .await
            .map_err(|failure| helm_error(operation, release, failure))
    }
}

fn helm_error(operation: &str, release: &str, failure: ProcessFailure) -> Error {
    match failure {
        ProcessFailure::Exited(stderr) if is_release_not_found(&stderr) => Error::NotFound,
        ProcessFailure::Cancelled => Error::cancelled(format!("helm {operation} {release}")),
        other => Error::helm(operation, release, other.to_string()),
    }
}

/// Whether helm's stderr says the release does not exist
pub fn is_release_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found") || stderr.contains("has no deployed releases")
}

fn values_stdin(req: &ReleaseRequest) -> Result<Option<String>, Error> {
    req.values
        .as_ref()
        .map(|v| {
            serde_json::to_string(v)
                .map_err(|e| Error::serialization_for_kind("values", e.to_string()))
        })
        .transpose()
}

fn push_release_flags(args: &mut Vec<String>, req: &ReleaseRequest, ctx: &CallContext) {
    args.extend([
        "--namespace".to_string(),
        req.namespace.clone(),
        "--timeout".to_string(),
        helm_duration(ctx.timeout),
        "--output".to_string(),
        "json".to_string(),
    ]);
    if req.values.is_some() {
        args.extend(["--values".to_string(), "-".to_string()]);
    }
    if req.wait {
        args.push("--wait".to_string());
    }
    if let Some(max) = req.history_max {
        args.extend(["--history-max".to_string(), max.to_string()]);
    }
}

/// Arguments of `helm install`
pub fn install_args(req: &ReleaseRequest, ctx: &CallContext) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        req.name.clone(),
        path_arg(&req.chart_path),
    ];
    push_release_flags(&mut args, req, ctx);
    args
}

/// Arguments of `helm upgrade`
pub fn upgrade_args(req: &ReleaseRequest, dry_run: bool, ctx: &CallContext) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        req.name.clone(),
        path_arg(&req.chart_path),
    ];
    push_release_flags(&mut args, req, ctx);
    if dry_run {
        args.push("--dry-run".to_string());
    }
    if req.force {
        args.push("--force".to_string());
    }
    if req.no_hooks {
        args.push("--no-hooks".to_string());
    }
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn scoped(cmd: &[&str], name: &str, namespace: &str) -> Vec<String> {
    let mut args: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
    args.extend([name.to_string(), "--namespace".to_string(), namespace.to_string()]);
    args
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn status(
        &self,
        name: &str,
        namespace: &str,
        ctx: &CallContext,
    ) -> Result<HelmRelease, Error> {
        let mut args = scoped(&["status"], name, namespace);
        args.extend(["--output".to_string(), "json".to_string()]);
        let out = self.run("status", name, args, None, ctx).await?;
        let release = HelmRelease::from_json(&out)?;
        if release.manifest.is_empty() {
            let manifest = self.manifest(name, namespace, ctx).await?;
            return Ok(release.with_manifest(manifest));
        }
        Ok(release)
    }

    async fn manifest(
        &self,
        name: &str,
        namespace: &str,
        ctx: &CallContext,
    ) -> Result<String, Error> {
        let args = scoped(&["get", "manifest"], name, namespace);
        self.run("get manifest", name, args, None, ctx).await
    }

    async fn install(&self, req: &ReleaseRequest, ctx: &CallContext) -> Result<HelmRelease, Error> {
        let out = self
            .run("install", &req.name, install_args(req, ctx), values_stdin(req)?, ctx)
            .await?;
        let release = HelmRelease::from_json(&out)?;
        info!(release = %release.name, version = release.version, "Installed release");
        Ok(release)
    }

    async fn upgrade(
        &self,
        req: &ReleaseRequest,
        dry_run: bool,
        ctx: &CallContext,
    ) -> Result<HelmRelease, Error> {
        let operation = if dry_run { "upgrade --dry-run" } else { "upgrade" };
        let out = self
            .run(
                operation,
                &req.name,
                upgrade_args(req, dry_run, ctx),
                values_stdin(req)?,
                ctx,
            )
            .await?;
        let release = HelmRelease::from_json(&out)?;
        if !dry_run {
            info!(release = %release.name, version = release.version, "Upgraded release");
        }
        Ok(release)
    }

    async fn uninstall(&self, name: &str, namespace: &str, ctx: &CallContext) -> Result<(), Error> {
        let mut args = scoped(&["uninstall"], name, namespace);
        args.extend(["--timeout".to_string(), helm_duration(ctx.timeout)]);
        self.run("uninstall", name, args, None, ctx).await?;
        info!(release = %name, namespace = %namespace, "Uninstalled release");
        Ok(())
    }

    async fn test(&self, name: &str, namespace: &str, ctx: &CallContext) -> Result<(), Error> {
        let mut args = scoped(&["test"], name, namespace);
        args.extend(["--timeout".to_string(), helm_duration(ctx.timeout)]);
        self.run("test", name, args, None, ctx).await?;
        Ok(())
    }

    async fn rollback(
        &self,
        name: &str,
        namespace: &str,
        revision: i32,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        let mut args = scoped(&["rollback"], name, namespace);
        args.insert(2, revision.to_string());
        args.extend([
            "--wait".to_string(),
            "--timeout".to_string(),
            helm_duration(ctx.timeout),
        ]);
        self.run("rollback", name, args, None, ctx).await?;
        info!(release = %name, revision, "Rolled back release");
        Ok(())
    }

    async fn version(&self, ctx: &CallContext) -> Result<String, Error> {
        let out = self
            .run("version", "", vec!["version".into(), "--short".into()], None, ctx)
            .await?;
        Ok(out.trim().to_string())
    }
}

/// Helm timeout for a chart, in order of precedence: the chart's own
/// setting, then the operator default
pub fn timeout_or(seconds: Option<u64>, default: Duration) -> Duration {
    seconds.map(Duration::from_secs).unwrap_or(default)
}
