//! Enablement order of group members
//!
//! Members are enabled by moving their target state from `uninitialized` to
//! `deployed`. A sequenced parent enables one member at a time and waits
//! for it to be satisfied before moving on.

use armada_common::crd::HelmResource;

/// Next member to enable in a sequenced group.
///
/// Scans in order and returns the first uninitialized member, unless an
/// earlier member is enabled but not yet satisfied, in which case nothing
/// is enabled until it settles.
pub fn get_next_to_enable<C: HelmResource>(members: &[C]) -> Option<&C> {
    for member in members {
        if member.is_target_state_uninitialized() {
            return Some(member);
        }
        if !member.is_satisfied() {
            return None;
        }
    }
    None
}

/// Every member still uninitialized, for groups without sequencing
pub fn get_all_disabled<C: HelmResource>(members: &[C]) -> Vec<&C> {
    members
        .iter()
        .filter(|m| m.is_target_state_uninitialized())
        .collect()
}
