//! # Cluster Runtime Seam
//!
//! Everything the importer and reconciler need from the cluster. The
//! runtime owns unit state; callers only observe it and request mutations.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    Pending,
    Running,
    Failed,
    Succeeded,
    Unknown,
}

impl UnitPhase {
    /// Phases remediation leaves alone
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Running | Self::Succeeded)
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Failed => "Failed",
            Self::Succeeded => "Succeeded",
            Self::Unknown => "Unknown",
        };
        write!(f, "{label}")
    }
}

/// Observed state of one deployment unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub phase: UnitPhase,
    pub ready_replicas: u32,
    pub desired_replicas: u32,
    pub restart_count: u32,
}

impl UnitStatus {
    pub fn new(name: impl Into<String>, phase: UnitPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            ready_replicas: 0,
            desired_replicas: 1,
            restart_count: 0,
        }
    }

    /// Status for a unit the runtime has no record of
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, UnitPhase::Unknown)
    }

    pub fn with_replicas(mut self, ready: u32, desired: u32) -> Self {
        self.ready_replicas = ready;
        self.desired_replicas = desired;
        self
    }

    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restart_count = restarts;
        self
    }

    /// Running with every desired replica ready, or completed
    pub fn is_ready(&self) -> bool {
        match self.phase {
            UnitPhase::Succeeded => true,
            UnitPhase::Running => self.ready_replicas >= self.desired_replicas.max(1),
            _ => false,
        }
    }

    /// One line for diagnostic dumps and the status table
    pub fn summary_line(&self) -> String {
        format!(
            "{:<12} {:<10} {}/{} ready  restarts={}",
            self.name, self.phase, self.ready_replicas, self.desired_replicas, self.restart_count
        )
    }
}

#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    async fn cluster_exists(&self) -> Result<bool>;

    /// Create the cluster when absent. Idempotent.
    async fn ensure_cluster(&self) -> Result<()>;

    /// Delete the cluster. No-op when absent.
    async fn delete_cluster(&self) -> Result<()>;

    /// Every image reference present in the cluster, from one bulk query
    async fn list_artifacts(&self) -> Result<HashSet<String>>;

    /// Import images in one call
    async fn import(&self, artifact_refs: &[String]) -> Result<()>;

    /// Submit a unit's declarative manifest
    async fn apply(&self, unit: &str, manifest: &Path) -> Result<()>;

    async fn unit_status(&self, name: &str) -> Result<UnitStatus>;

    /// Statuses for `names`, in the same order
    async fn unit_statuses(&self, names: &[String]) -> Result<Vec<UnitStatus>> {
        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            statuses.push(self.unit_status(name).await?);
        }
        Ok(statuses)
    }

    /// Delete the unit's running instances so the runtime recreates them
    async fn restart_unit(&self, name: &str) -> Result<()>;

    /// Roll the unit's instances to pick up a refreshed image
    async fn rolling_restart(&self, name: &str) -> Result<()>;

    /// Replace and start a one-shot job
    async fn run_one_shot_job(&self, name: &str, manifest: &Path) -> Result<()>;

    /// `true` when the job completed within `timeout`
    async fn wait_for_job_completion(&self, name: &str, timeout: Duration) -> Result<bool>;
}
