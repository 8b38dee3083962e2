//! Helm release backend for ArmadaChart resources
//!
//! Charts are resolved to a local directory ([`source`]), then installed,
//! upgraded, tested and uninstalled through the `helm` executable
//! ([`helm`]). [`ChartReleaseManager`] ties both together for one reconcile
//! of one chart.

#![deny(missing_docs)]

pub mod dependents;
pub mod helm;
pub mod manager;
pub mod process;
pub mod release;
pub mod source;

pub use dependents::KubeDependentClient;
pub use helm::{HelmCli, HelmClient, ReleaseRequest};
pub use manager::{ChartReleaseManager, ReleaseManagerFactory};
pub use process::CallContext;
pub use release::{DependentClient, HelmRelease, ReleaseStatus};
pub use source::{ChartSourceResolver, SourceFetcher};
