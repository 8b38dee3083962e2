//! Chart sources
//!
//! Charts come from git repositories, tarball URLs or directories already
//! on disk. Fetched sources are cached for the life of the process, keyed
//! by where they came from, so a chart group with many members pointing at
//! the same repository clones it once. Each fetch lands in a fresh
//! directory and fetches of one source are serialized, so concurrent
//! resolves never share a half-written checkout.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use armada_common::crd::{ArmadaChartSource, ChartSourceType};
use armada_common::Error;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::process::{self, CallContext};

/// Directory under the charts dir holding cloned repositories
pub const GIT_CACHE_DIR: &str = "git-cache";
/// Directory under the charts dir holding extracted tarballs
pub const TAR_CACHE_DIR: &str = "tar-cache";
/// Directory under the charts dir holding prebuilt dependency archives
pub const DEPENDENCY_CACHE_DIR: &str = "dependency-cache";
/// Archive copied into charts that declare dependencies
pub const HELM_TOOLKIT_ARCHIVE: &str = "helm-toolkit-0.1.0.tgz";
/// Git reference checked out when a source names none
pub const DEFAULT_GIT_REFERENCE: &str = "master";

/// Git reference of a source, [`DEFAULT_GIT_REFERENCE`] when unset
pub fn git_reference(source: &ArmadaChartSource) -> &str {
    match source.reference.trim() {
        "" => DEFAULT_GIT_REFERENCE,
        reference => reference,
    }
}

/// Cache key of a source: `git://location@reference`, `tar://location` or
/// `local://location`
pub fn source_key(source: &ArmadaChartSource) -> String {
    match source.type_ {
        ChartSourceType::Git => format!("git://{}@{}", source.location, git_reference(source)),
        ChartSourceType::Tar => format!("tar://{}", source.location),
        ChartSourceType::Local => format!("local://{}", source.location),
    }
}

/// Turn a cache key into a directory name
fn cache_dir_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Source key to fetched root directory
#[derive(Debug, Default)]
pub struct DirCache {
    dirs: RwLock<HashMap<String, PathBuf>>,
}

impl DirCache {
    /// Root directory previously fetched for `key`
    pub fn get(&self, key: &str) -> Option<PathBuf> {
        self.dirs.read().get(key).cloned()
    }

    /// Remember where `key` was fetched to
    pub fn set(&self, key: impl Into<String>, dir: PathBuf) {
        self.dirs.write().insert(key.into(), dir);
    }

    /// Forget a source so the next resolve fetches it again
    pub fn remove(&self, key: &str) -> Option<PathBuf> {
        self.dirs.write().remove(key)
    }
}

/// Chart directories already prepared for helm
#[derive(Debug, Default)]
pub struct ChartCache {
    charts: RwLock<HashSet<PathBuf>>,
}

impl ChartCache {
    /// Whether the chart at `path` was prepared
    pub fn contains(&self, path: &Path) -> bool {
        self.charts.read().contains(path)
    }

    /// Mark the chart at `path` prepared
    pub fn insert(&self, path: PathBuf) {
        self.charts.write().insert(path);
    }
}

/// Fetches chart sources onto the local filesystem
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `location` into `dest` and check out `reference`
    async fn git_clone(
        &self,
        location: &str,
        reference: &str,
        proxy: Option<String>,
        dest: &Path,
        ctx: &CallContext,
    ) -> Result<(), Error>;

    /// Download the tarball at `location` and extract it under `dest`
    async fn pull_tarball(&self, location: &str, dest: &Path, ctx: &CallContext)
        -> Result<(), Error>;

    /// Copy a dependency archive into a chart's `charts/` directory
    async fn copy_dependency(&self, archive: &Path, chart_dir: &Path) -> Result<(), Error>;
}

/// [`SourceFetcher`] driving the `git` and `helm` executables
#[derive(Clone, Debug)]
pub struct CliSourceFetcher {
    git_bin: PathBuf,
    helm_bin: PathBuf,
}

impl CliSourceFetcher {
    /// Use the given executables
    pub fn new(git_bin: impl Into<PathBuf>, helm_bin: impl Into<PathBuf>) -> Self {
        Self {
            git_bin: git_bin.into(),
            helm_bin: helm_bin.into(),
        }
    }
}

/// Arguments of the clone step
pub fn git_clone_args(location: &str, proxy: Option<&str>, dest: &Path) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(proxy) = proxy {
        args.extend(["-c".to_string(), format!("http.proxy={proxy}")]);
    }
    args.extend([
        "clone".to_string(),
        "--quiet".to_string(),
        location.to_string(),
        dest.to_string_lossy().into_owned(),
    ]);
    args
}

#[async_trait]
impl SourceFetcher for CliSourceFetcher {
    async fn git_clone(
        &self,
        location: &str,
        reference: &str,
        proxy: Option<String>,
        dest: &Path,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        process::run(&self.git_bin, git_clone_args(location, proxy.as_deref(), dest), None, ctx)
            .await
            .map_err(|e| Error::source_for(location, format!("clone failed: {e}")))?;

        let dir = dest.to_string_lossy().into_owned();
        let args = ["-C", dir.as_str(), "checkout", "--quiet", reference];
        process::run(&self.git_bin, args, None, ctx)
            .await
            .map_err(|e| Error::source_for(location, format!("checkout of {reference} failed: {e}")))?;
        Ok(())
    }

    async fn pull_tarball(
        &self,
        location: &str,
        dest: &Path,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| Error::source_for(location, e.to_string()))?;
        let dir = dest.to_string_lossy().into_owned();
        let args = ["pull", location, "--untar", "--untardir", dir.as_str()];
        process::run(&self.helm_bin, args, None, ctx)
            .await
            .map_err(|e| Error::source_for(location, format!("download failed: {e}")))?;
        Ok(())
    }

    async fn copy_dependency(&self, archive: &Path, chart_dir: &Path) -> Result<(), Error> {
        let location = archive.to_string_lossy();
        let charts = chart_dir.join("charts");
        tokio::fs::create_dir_all(&charts)
            .await
            .map_err(|e| Error::source_for(location.as_ref(), e.to_string()))?;
        let meta = tokio::fs::metadata(archive)
            .await
            .map_err(|e| Error::source_for(location.as_ref(), e.to_string()))?;
        if !meta.is_file() {
            return Err(Error::source_for(location.as_ref(), "not a regular file"));
        }
        tokio::fs::copy(archive, charts.join(HELM_TOOLKIT_ARCHIVE))
            .await
            .map_err(|e| Error::source_for(location.as_ref(), e.to_string()))?;
        Ok(())
    }
}

/// Resolves a chart's source to a local chart directory
pub struct ChartSourceResolver {
    charts_dir: PathBuf,
    fetcher: Arc<dyn SourceFetcher>,
    dirs: DirCache,
    charts: ChartCache,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChartSourceResolver {
    /// Fetch into `charts_dir` using `fetcher`
    pub fn new(charts_dir: impl Into<PathBuf>, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            charts_dir: charts_dir.into(),
            fetcher,
            dirs: DirCache::default(),
            charts: ChartCache::default(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh directory for one fetch of the source. Local sources are used
    /// where they are.
    pub fn fetch_dir(&self, source: &ArmadaChartSource) -> PathBuf {
        let unique = || {
            format!(
                "{}-{:08x}",
                cache_dir_name(&source_key(source)),
                rand::random::<u32>()
            )
        };
        match source.type_ {
            ChartSourceType::Git => self.charts_dir.join(GIT_CACHE_DIR).join(unique()),
            ChartSourceType::Tar => self.charts_dir.join(TAR_CACHE_DIR).join(unique()),
            ChartSourceType::Local => PathBuf::from(&source.location),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Local directory of the chart, fetching the source on first use
    pub async fn resolve(
        &self,
        source: &ArmadaChartSource,
        dependencies: &[String],
        ctx: &CallContext,
    ) -> Result<PathBuf, Error> {
        validate_source(source)?;
        let key = source_key(source);
        if let Some(root) = self.dirs.get(&key) {
            let chart_path = chart_dir_in(source, root);
            if self.charts.contains(&chart_path) {
                return Ok(chart_path);
            }
        }

        let lock = self.key_lock(&key);
        let _fetching = lock.lock().await;
        let root = match self.dirs.get(&key) {
            Some(root) => root,
            None => {
                let root = self.fetch_dir(source);
                if let Err(e) = self.fetch(source, &root, ctx).await {
                    discard(source, &root).await;
                    return Err(e);
                }
                self.dirs.set(key.clone(), root.clone());
                root
            }
        };

        let chart_path = chart_dir_in(source, root);
        if !self.charts.contains(&chart_path) {
            if !dependencies.is_empty() {
                let archive = self
                    .charts_dir
                    .join(DEPENDENCY_CACHE_DIR)
                    .join(HELM_TOOLKIT_ARCHIVE);
                self.fetcher.copy_dependency(&archive, &chart_path).await?;
                debug!(chart = %chart_path.display(), "Copied helm-toolkit dependency");
            }
            self.charts.insert(chart_path.clone());
        }
        Ok(chart_path)
    }

    async fn fetch(
        &self,
        source: &ArmadaChartSource,
        root: &Path,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        match source.type_ {
            ChartSourceType::Git => {
                let reference = git_reference(source);
                info!(location = %source.location, %reference, "Cloning chart source");
                self.fetcher
                    .git_clone(
                        &source.location,
                        reference,
                        source.proxy_server.clone(),
                        root,
                        ctx,
                    )
                    .await
            }
            ChartSourceType::Tar => {
                info!(location = %source.location, "Downloading chart tarball");
                self.fetcher.pull_tarball(&source.location, root, ctx).await
            }
            ChartSourceType::Local => Ok(()),
        }
    }
}

fn chart_dir_in(source: &ArmadaChartSource, root: PathBuf) -> PathBuf {
    match source.type_ {
        ChartSourceType::Local => root,
        _ => root.join(&source.subpath),
    }
}

/// Drop what a failed fetch left behind
async fn discard(source: &ArmadaChartSource, root: &Path) {
    if source.type_ == ChartSourceType::Local || !root.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(root).await {
        warn!(dir = %root.display(), error = %e, "Failed to remove partial chart source");
    }
}

fn validate_source(source: &ArmadaChartSource) -> Result<(), Error> {
    if source.location.is_empty() {
        return Err(Error::validation("chart source location is empty"));
    }
    if source.type_ == ChartSourceType::Git {
        match source.auth_method.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("ssh") => {}
            Some(other) => {
                return Err(Error::source_for(
                    &source.location,
                    format!("auth method {other} not supported"),
                ))
            }
        }
    }
    Ok(())
}
