//! # Deployment Reconciliation
//!
//! Applies the unit manifests and drives the cluster toward a ready state
//! with bounded waits, a single remediation pass and a non-fatal seed step.

pub mod reconciler;
pub mod states;
pub mod summary;

pub use reconciler::{DeploymentReconciler, ReconcilerSettings, SeedSettings};
pub use states::ReconcileState;
pub use summary::{
    diagnostic_dump, ReconcileOutcome, ReconcileSummary, ReconcileWarning, SeedOutcome,
};
