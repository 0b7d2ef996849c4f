//! # Cluster Integration
//!
//! The [`ClusterRuntime`] seam, its k3d/kubectl implementation and the
//! chunked image importer built on top of it.

pub mod importer;
pub mod k3d;
pub mod runtime;

pub use importer::{plan_batches, ArtifactImporter, ImportBatch, ImportReport};
pub use k3d::K3dRuntime;
pub use runtime::{ClusterRuntime, UnitPhase, UnitStatus};
