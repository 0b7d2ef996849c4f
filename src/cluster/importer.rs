//! # Artifact Importer
//!
//! Pushes images into the cluster in size-bounded chunks. The needed set is
//! every image built this run plus every image the cluster does not list.
//! The cluster is listed once per run, never per target.
//!
//! Chunks are imported one after another. The first failing chunk aborts
//! the rest; chunks already imported stay in the cluster and the next run
//! recomputes its needed set from the listing.

use super::runtime::ClusterRuntime;
use crate::build::BuildTarget;
use crate::clock::Clock;
use crate::error::{DeployError, Result};
use crate::logging::log_import_operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Images imported together in one runtime call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub members: Vec<String>,
    pub imported_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    fn new(members: Vec<String>) -> Self {
        Self {
            members,
            imported_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Split `needed` into import calls.
///
/// Sets no larger than `small_batch_threshold` go in one call; larger sets
/// are cut into chunks of `chunk_size`, order preserved.
pub fn plan_batches(needed: &[String], chunk_size: usize, small_batch_threshold: usize) -> Vec<ImportBatch> {
    if needed.is_empty() {
        return Vec::new();
    }
    if needed.len() <= small_batch_threshold {
        return vec![ImportBatch::new(needed.to_vec())];
    }
    needed
        .chunks(chunk_size.max(1))
        .map(|chunk| ImportBatch::new(chunk.to_vec()))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Image references that needed importing, in target order
    pub needed: Vec<String>,
    pub batches: Vec<ImportBatch>,
    pub imported: usize,
}

impl ImportReport {
    pub fn call_count(&self) -> usize {
        self.batches.len()
    }
}

pub struct ArtifactImporter {
    runtime: Arc<dyn ClusterRuntime>,
    clock: Arc<dyn Clock>,
    chunk_size: usize,
    small_batch_threshold: usize,
}

impl ArtifactImporter {
    pub fn new(
        runtime: Arc<dyn ClusterRuntime>,
        clock: Arc<dyn Clock>,
        chunk_size: usize,
        small_batch_threshold: usize,
    ) -> Self {
        Self {
            runtime,
            clock,
            chunk_size,
            small_batch_threshold,
        }
    }

    /// Images from `targets` that must be imported
    pub async fn needed_set(
        &self,
        targets: &[BuildTarget],
        just_built: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let present = self.runtime.list_artifacts().await?;
        let mut seen = HashSet::new();
        Ok(targets
            .iter()
            .filter(|t| just_built.contains(&t.name) || !present.contains(&t.artifact_ref))
            .filter(|t| seen.insert(t.artifact_ref.clone()))
            .map(|t| t.artifact_ref.clone())
            .collect())
    }

    pub async fn import(
        &self,
        targets: &[BuildTarget],
        just_built: &HashSet<String>,
    ) -> Result<ImportReport> {
        let needed = self.needed_set(targets, just_built).await?;
        if needed.is_empty() {
            info!("✅ Cluster already has every image, skipping import");
            return Ok(ImportReport::default());
        }

        let mut batches = plan_batches(&needed, self.chunk_size, self.small_batch_threshold);
        let total = needed.len();
        let chunks = batches.len();
        let mut imported = 0;

        info!(
            images = total,
            chunks = chunks,
            "📦 Importing {} image(s) into the cluster",
            total
        );

        for (index, batch) in batches.iter_mut().enumerate() {
            let chunk = index + 1;
            log_import_operation("import", chunk, chunks, imported, total, "started");

            if let Err(e) = self.runtime.import(&batch.members).await {
                error!(
                    chunk = chunk,
                    chunks = chunks,
                    members = %batch.members.join(", "),
                    error = %e,
                    "❌ Image import failed"
                );
                log_import_operation("import", chunk, chunks, imported, total, "failed");
                return Err(DeployError::ImportFailure {
                    chunk,
                    chunks,
                    members: batch.members.clone(),
                    imported,
                    message: e.to_string(),
                });
            }

            batch.imported_at = Some(self.clock.now());
            imported += batch.len();
            info!("📦 Imported {}/{} image(s)", imported, total);
            log_import_operation("import", chunk, chunks, imported, total, "completed");
        }

        Ok(ImportReport {
            needed,
            batches,
            imported,
        })
    }
}
