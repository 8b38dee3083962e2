//! Reconcilers for the Armada custom resources
//!
//! An ArmadaManifest enables its ArmadaChartGroups in order, a chart group
//! enables its ArmadaCharts, and each chart is installed as one Helm release.
//! Parents never touch helm: they only claim their members and move member
//! target states, so every level reconciles independently.
//!
//! Related crates:
//! - `armada-common`: CRDs, errors, events and configuration
//! - `armada-helm`: chart sources and the helm release backend

#![deny(missing_docs)]

pub mod chart;
pub mod chart_group;
pub mod client;
pub mod context;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod members;
pub mod predicate;
pub mod sequencer;
pub mod watches;

#[cfg(test)]
mod testing;

pub use client::{KubeResourceClient, ResourceClient};
pub use context::{ArmadaKind, Context, ContextBuilder};
pub use lifecycle::error_policy;
pub use manager::{ReleaseManager, ReleaseManagers};
pub use predicate::{DependentEvent, DependentPredicate};
pub use watches::{DependentWatchRegistry, DependentWatches};

// Re-export common error types
pub use armada_common::{Error, Result};
