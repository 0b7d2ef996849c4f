//! # Image Builds
//!
//! Decides which targets are stale and rebuilds them under a bounded pool.
//!
//! - [`target`]: build target definitions
//! - [`freshness`]: source/image timestamp comparison
//! - [`backend`]: builder and image store seams plus their Docker implementations
//! - [`scheduler`]: sliding-window build pool

pub mod backend;
pub mod freshness;
pub mod scheduler;
pub mod target;

pub use backend::{ArtifactBuilder, ArtifactStore, BuildOutput, DockerArtifactStore, DockerBuilder};
pub use freshness::{evaluate, newest_source_mtime, FreshnessOracle, StalenessDecision, StalenessVerdict};
pub use scheduler::{BuildJob, BuildJobStatus, BuildScheduler, FailureCollector, JobBoard, ScheduleReport};
pub use target::BuildTarget;
