//! Common types for Armada: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod outcome;
pub mod readiness;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use outcome::ManagerResult;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
