//! Per-reconcile managers
//!
//! A manager observes one parent resource and its members (`sync`), then
//! installs, updates, reconciles or uninstalls them. Operations touching
//! several members never stop at the first failure: every member is
//! attempted and the first error travels back with whatever was done.

mod chart_group;
mod manifest;
mod parent;
mod release;

use armada_common::crd::HelmResource;
use armada_common::{Error, ManagerResult};
use async_trait::async_trait;
use kube::ResourceExt;

use crate::sequencer::{get_all_disabled, get_next_to_enable};

pub use parent::{MemberPolicy, ParentManager};
pub use release::{ReleaseManager, ReleaseManagers};

#[cfg(test)]
pub use release::{MockReleaseManager, MockReleaseManagers};

/// Manager for a chart group
pub type ChartGroupManager = ParentManager<armada_common::crd::ArmadaChartGroup>;

/// Manager for a manifest
pub type ManifestManager = ParentManager<armada_common::crd::ArmadaManifest>;

/// Named, ordered list of member resources
#[derive(Clone, Debug)]
pub struct Members<C> {
    /// Name of the list, the parent's name
    pub name: String,
    /// Members in declaration order
    pub items: Vec<C>,
}

impl<C: HelmResource> Members<C> {
    /// Create a member list
    pub fn new(name: impl Into<String>, items: Vec<C>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }

    /// Empty list named after the parent
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// True when every member is satisfied
    pub fn is_ready(&self) -> bool {
        self.items.iter().all(|m| m.is_satisfied())
    }

    /// Next member to enable when sequenced
    pub fn next_to_enable(&self) -> Option<&C> {
        get_next_to_enable(&self.items)
    }

    /// Every member still disabled
    pub fn all_disabled(&self) -> Vec<&C> {
        get_all_disabled(&self.items)
    }

    /// Member names, in order
    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|m| m.name_any()).collect()
    }
}

/// One level of the manifest/group/chart hierarchy
#[async_trait]
pub trait ArmadaManager: Send + Sync {
    /// Member kind
    type Member: HelmResource;

    /// Name of the managed resource
    fn resource_name(&self) -> String;

    /// Whether `sync` found the members claimed
    fn is_installed(&self) -> bool;

    /// Whether `sync` found members that need updating
    fn is_update_required(&self) -> bool;

    /// Observe the members; any failure to fetch one is an error
    async fn sync(&mut self) -> Result<(), Error>;

    /// Members that currently exist
    async fn install_resource(&self) -> ManagerResult<Members<Self::Member>>;

    /// Push parent-level settings to every member
    async fn update_resource(&self) -> ManagerResult<Members<Self::Member>>;

    /// Enable the next member(s)
    async fn reconcile_resource(&self) -> ManagerResult<Members<Self::Member>>;

    /// Delete every member
    async fn uninstall_resource(&self) -> ManagerResult<Members<Self::Member>>;

    /// Make the parent the controller owner of each member
    async fn claim_ownership(&self, members: &Members<Self::Member>) -> ManagerResult<()>;
}
