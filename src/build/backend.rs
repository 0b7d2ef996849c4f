//! # Build Backend
//!
//! Seams between the build policy and the container tooling. The Docker
//! implementations shell out to the `docker` CLI; tests use the in-memory
//! fakes from `test_helpers`.

use super::target::BuildTarget;
use crate::error::{DeployError, Result};
use crate::process::{args, run_command};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Result of one build invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub success: bool,
    /// Everything the builder printed
    pub log: String,
}

/// Produces images from source trees
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, target: &BuildTarget, no_cache: bool) -> Result<BuildOutput>;
}

/// Local image store queries
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Creation time of `artifact_ref`, or `None` when the image is absent
    async fn exists(&self, artifact_ref: &str) -> Result<Option<DateTime<Utc>>>;
}

/// `docker build` backed builder
#[derive(Debug, Clone)]
pub struct DockerBuilder {
    program: String,
}

impl Default for DockerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBuilder {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    fn build_args(target: &BuildTarget, no_cache: bool) -> Vec<String> {
        let mut command = args(["build", "-t"]);
        command.push(target.artifact_ref.clone());
        command.push("-f".to_string());
        command.push(target.dockerfile_path().display().to_string());
        if no_cache {
            command.push("--no-cache".to_string());
        }
        command.push(target.source_path.display().to_string());
        command
    }
}

#[async_trait]
impl ArtifactBuilder for DockerBuilder {
    async fn build(&self, target: &BuildTarget, no_cache: bool) -> Result<BuildOutput> {
        // builds are never interrupted once started
        let output = run_command(&self.program, &Self::build_args(target, no_cache), None, None).await?;
        Ok(BuildOutput {
            success: output.success,
            log: output.combined(),
        })
    }
}

/// Image queries against the local Docker daemon. Every query is bounded by
/// `command_timeout`; a wedged daemon surfaces as a process timeout.
#[derive(Debug, Clone)]
pub struct DockerArtifactStore {
    program: PathBuf,
    command_timeout: Duration,
}

impl DockerArtifactStore {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("docker"),
            command_timeout,
        }
    }

    /// Use a different `docker` executable
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

/// Parse `docker image inspect --format '{{.Created}}'` output
pub fn parse_docker_created(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl ArtifactStore for DockerArtifactStore {
    async fn exists(&self, artifact_ref: &str) -> Result<Option<DateTime<Utc>>> {
        let mut command = args(["image", "inspect", "--format", "{{.Created}}"]);
        command.push(artifact_ref.to_string());
        let program = self.program.to_string_lossy();
        let output = run_command(&program, &command, None, Some(self.command_timeout)).await?;

        if !output.success {
            debug!(artifact = %artifact_ref, "Image not present in local store");
            return Ok(None);
        }

        match parse_docker_created(&output.stdout) {
            Some(created) => Ok(Some(created)),
            None => Err(DeployError::artifact(
                artifact_ref,
                format!("unparseable creation time: {}", output.stdout.trim()),
            )),
        }
    }
}
