//! Stage provisioning for Conveyor CD pipelines
//!
//! This crate turns `Stage` resources into the cluster objects a pipeline
//! step needs and tears them down again in pipeline order:
//!
//! - **Chain**: ordered provisioning and deprovisioning steps, routed per platform
//! - **Ordering**: previous-stage and dependent-stage lookups among siblings
//! - **Deletion**: finalizer-driven, order-aware stage removal
//! - **Controller**: the `Stage` reconciler and its error policy

pub mod chain;
pub mod client;
pub mod controller;
pub mod deletion;
pub mod ordering;
pub mod quality_gates;

#[cfg(test)]
mod testing;

pub use client::{StageKubeClient, StageKubeClientImpl};
pub use controller::{error_policy, reconcile, StageContext};
