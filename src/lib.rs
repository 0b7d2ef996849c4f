#![allow(clippy::doc_markdown)] // Allow technical terms like k3d, kubectl in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # ECI Deploy
//!
//! Build-and-deploy driver for the ECI microservices platform on a local
//! k3d cluster.
//!
//! ## Overview
//!
//! A deploy run rebuilds only the container images whose sources changed,
//! imports only the images the cluster is missing, applies every unit
//! manifest and waits for the platform to come up, giving unhealthy units
//! one remediation pass before deciding between success, degraded success
//! and failure.
//!
//! ## Pipeline
//!
//! 1. **Freshness**: compare newest source mtime against image creation time
//! 2. **Builds**: rebuild stale targets under a bounded pool, collecting every failure
//! 3. **Import**: one cluster listing, then chunked `k3d image import` calls
//! 4. **Reconcile**: infra first, then apps, remediation, then the seed job
//! 5. **Smoke**: gateway health and token checks
//!
//! ## Module Organization
//!
//! - [`build`] - Build targets, freshness oracle and build scheduler
//! - [`cluster`] - Cluster runtime seam, k3d implementation and image importer
//! - [`reconcile`] - Readiness waits, remediation and seeding
//! - [`orchestration`] - Top-level workflows behind the CLI
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eci_deploy::config::ConfigManager;
//! use eci_deploy::orchestration::{Collaborators, DeployOptions, OrchestrationDriver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//! let driver = OrchestrationDriver::new(config.clone(), Collaborators::docker_k3d(&config));
//!
//! let report = driver.deploy(DeployOptions::default()).await?;
//! println!("built {} image(s)", report.builds.scheduled_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Every external tool sits behind a trait; [`test_helpers`] provides
//! in-memory builders, image stores and cluster runtimes so the whole
//! pipeline runs under paused tokio time:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod build;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod process;
pub mod reconcile;
pub mod test_helpers;

pub use build::{BuildScheduler, BuildTarget, FreshnessOracle, StalenessDecision, StalenessVerdict};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cluster::{ArtifactImporter, ClusterRuntime, UnitPhase, UnitStatus};
pub use config::{ConfigManager, DeployConfig};
pub use error::{DeployError, Result};
pub use orchestration::{DeployOptions, DeployReport, OrchestrationDriver};
pub use reconcile::{DeploymentReconciler, ReconcileOutcome, ReconcileState, ReconcileSummary};
