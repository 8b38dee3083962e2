//! Armada operator: deploys Helm releases from Armada manifests

#![deny(missing_docs)]

/// Controller wiring for the three Armada kinds
pub mod controller_runner;
/// Startup utilities (CRD install)
pub mod startup;
