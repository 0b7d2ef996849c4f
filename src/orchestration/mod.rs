//! # Orchestration
//!
//! Operator-facing workflows: `deploy`, `rebuild`, `status`, `fix`,
//! `smoke` and `down`, plus the prerequisite and smoke checks they use.

pub mod driver;
pub mod prerequisites;
pub mod smoke;

pub use driver::{Collaborators, DeployOptions, DeployReport, OrchestrationDriver, SmokeResult};
pub use prerequisites::check_prerequisites;
pub use smoke::{SmokeChecker, SmokeReport};
