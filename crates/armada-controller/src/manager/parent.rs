//! Manager shared by the two parent kinds
//!
//! A chart group and a manifest behave the same one level apart: both own
//! an ordered list of named members, claim them, label them and enable them.
//! [`MemberPolicy`] captures what differs between the two.

use std::collections::BTreeMap;
use std::sync::Arc;

use armada_common::crd::{HelmResource, HelmResourceState};
use armada_common::kube_utils::MEMBERSHIP_LABEL;
use armada_common::{Error, ManagerResult};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::{ArmadaManager, Members};
use crate::client::ResourceClient;

/// How a parent kind lays out its members
pub trait MemberPolicy: HelmResource {
    /// Kind of the members
    type Member: HelmResource;

    /// Member names, in declaration order
    fn member_names(&self) -> Vec<String>;

    /// Whether members are enabled one at a time
    fn sequenced(&self) -> bool;

    /// The member as this parent would create it
    fn expected_member(&self, name: &str) -> Self::Member;

    /// Every expected member, in order
    fn expected_members(&self) -> Vec<Self::Member> {
        self.member_names()
            .iter()
            .map(|name| self.expected_member(name))
            .collect()
    }
}

/// Membership labels a member of `parent` carries
pub(crate) fn membership_labels(parent: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(MEMBERSHIP_LABEL.to_string(), parent.to_string())])
}

fn carries_membership_label<C: HelmResource>(member: &C, parent: &str) -> bool {
    member
        .labels()
        .get(MEMBERSHIP_LABEL)
        .is_some_and(|v| v == parent)
}

/// [`ArmadaManager`] for any [`MemberPolicy`] parent
pub struct ParentManager<P: MemberPolicy> {
    parent: P,
    members: Arc<dyn ResourceClient<P::Member>>,
    installed: bool,
    update_required: bool,
}

impl<P: MemberPolicy> ParentManager<P> {
    /// Manager for one reconcile of `parent`
    pub fn new(parent: P, members: Arc<dyn ResourceClient<P::Member>>) -> Self {
        Self {
            parent,
            members,
            installed: false,
            update_required: false,
        }
    }

    fn namespace(&self) -> String {
        self.parent.namespace().unwrap_or_default()
    }

    fn name(&self) -> String {
        self.parent.name_any()
    }

    /// Fetch every expected member, keeping the ones found.
    ///
    /// Not-found members are left out silently; other failures are collected.
    async fn fetch_existing(&self) -> (Vec<P::Member>, Vec<Error>) {
        let namespace = self.namespace();
        let mut found = Vec::new();
        let mut errors = Vec::new();
        for expected in self.parent.expected_members() {
            match self.members.get(&expected.name_any(), &namespace).await {
                Ok(member) => found.push(member),
                Err(e) if e.is_not_found() => {
                    debug!(member = %expected.name_any(), "Member not found, skipping");
                }
                Err(e) => errors.push(e),
            }
        }
        (found, errors)
    }
}

#[async_trait]
impl<P: MemberPolicy> ArmadaManager for ParentManager<P> {
    type Member = P::Member;

    fn resource_name(&self) -> String {
        self.name()
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    fn is_update_required(&self) -> bool {
        self.update_required
    }

    async fn sync(&mut self) -> Result<(), Error> {
        let namespace = self.namespace();
        let parent = self.name();
        let mut members = Vec::new();
        for expected in self.parent.expected_members() {
            let member = self.members.get(&expected.name_any(), &namespace).await?;
            members.push(member);
        }

        self.installed = self.parent.actual_state() == HelmResourceState::Deployed
            || members.iter().all(|m| m.has_owner());
        self.update_required =
            self.installed && members.iter().any(|m| !carries_membership_label(m, &parent));

        debug!(
            resource = %parent,
            members = members.len(),
            installed = self.installed,
            update_required = self.update_required,
            "Synced members"
        );
        Ok(())
    }

    async fn install_resource(&self) -> ManagerResult<Members<P::Member>> {
        let (found, errors) = self.fetch_existing().await;
        ManagerResult::from_errors(Members::new(self.name(), found), errors)
    }

    async fn update_resource(&self) -> ManagerResult<Members<P::Member>> {
        let namespace = self.namespace();
        let mut updated = Vec::new();
        let mut errors = Vec::new();
        for expected in self.parent.expected_members() {
            let name = expected.name_any();
            let labels = expected.labels().clone();
            if let Err(e) = self.members.patch_labels(&name, &namespace, labels).await {
                warn!(member = %name, error = %e, "Failed to update member");
                errors.push(e);
                continue;
            }
            match self.members.get(&name, &namespace).await {
                Ok(member) => updated.push(member),
                Err(e) => errors.push(e),
            }
        }
        ManagerResult::from_errors_not_found(Members::new(self.name(), updated), errors)
    }

    async fn reconcile_resource(&self) -> ManagerResult<Members<P::Member>> {
        let namespace = self.namespace();
        let (found, mut errors) = self.fetch_existing().await;
        let mut members = Members::new(self.name(), found);

        let to_enable: Vec<String> = if self.parent.sequenced() {
            members.next_to_enable().map(|m| m.name_any()).into_iter().collect()
        } else {
            members.all_disabled().iter().map(|m| m.name_any()).collect()
        };

        for name in to_enable {
            match self
                .members
                .patch_target_state(&name, &namespace, HelmResourceState::Deployed)
                .await
            {
                Ok(()) => {
                    info!(resource = %members.name, member = %name, "Enabled member");
                    if let Some(member) = members.items.iter_mut().find(|m| m.name_any() == name) {
                        member.set_target_state(HelmResourceState::Deployed);
                    }
                }
                Err(e) => {
                    warn!(member = %name, error = %e, "Failed to enable member");
                    errors.push(e);
                }
            }
        }

        ManagerResult::from_errors(members, errors)
    }

    async fn uninstall_resource(&self) -> ManagerResult<Members<P::Member>> {
        let namespace = self.namespace();
        let mut errors = Vec::new();
        for name in self.parent.member_names() {
            match self.members.delete(&name, &namespace).await {
                Ok(()) => debug!(member = %name, "Deleted member"),
                Err(e) => errors.push(e),
            }
        }
        ManagerResult::from_errors_not_found(Members::empty(self.name()), errors)
    }

    async fn claim_ownership(&self, members: &Members<P::Member>) -> ManagerResult<()> {
        let Some(owner) = self.parent.controller_owner_ref(&()) else {
            return ManagerResult::with_error(
                (),
                Error::internal_with_context("ownership", format!("{} has no uid", self.name())),
            );
        };
        let namespace = self.namespace();
        let mut errors = Vec::new();
        for member in members.items.iter().filter(|m| !m.is_owned_by(&owner.uid)) {
            if let Err(e) = self
                .members
                .set_controller_owner(&member.name_any(), &namespace, owner.clone())
                .await
            {
                errors.push(e);
            }
        }
        ManagerResult::from_errors((), errors)
    }
}
