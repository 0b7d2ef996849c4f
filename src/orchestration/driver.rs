//! # Orchestration Driver
//!
//! Top-level workflows behind the CLI. A deploy runs
//! prerequisites → cluster bootstrap → freshness → builds → import →
//! reconciliation → smoke checks, stopping at the first fatal error.
//! The driver is the only place that turns outcomes into a final report.

use super::prerequisites::check_prerequisites;
use super::smoke::{SmokeChecker, SmokeReport};
use crate::build::{
    ArtifactBuilder, ArtifactStore, BuildScheduler, BuildTarget, DockerArtifactStore,
    DockerBuilder, FreshnessOracle, ScheduleReport, StalenessVerdict,
};
use crate::clock::{Clock, SystemClock};
use crate::cluster::{ArtifactImporter, ClusterRuntime, ImportReport, K3dRuntime, UnitStatus};
use crate::config::DeployConfig;
use crate::constants::REQUIRED_BINARIES;
use crate::error::Result;
use crate::reconcile::{DeploymentReconciler, ReconcileSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// External collaborators the driver works through
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn ArtifactBuilder>,
    pub store: Arc<dyn ArtifactStore>,
    pub runtime: Arc<dyn ClusterRuntime>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Docker for builds and images, k3d/kubectl for the cluster
    pub fn docker_k3d(config: &DeployConfig) -> Self {
        Self {
            builder: Arc::new(DockerBuilder::new()),
            store: Arc::new(DockerArtifactStore::new(Duration::from_secs(
                config.cluster.command_timeout_seconds.max(1),
            ))),
            runtime: Arc::new(K3dRuntime::new(config.cluster.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Pass `--no-cache` to every build
    pub no_cache: bool,
    /// Treat every target as `force_rebuild`
    pub force_rebuild_all: bool,
    pub skip_smoke: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SmokeResult {
    Passed(SmokeReport),
    Failed { message: String },
}

/// Everything a deploy run decided and observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub run_id: Uuid,
    pub verdicts: Vec<StalenessVerdict>,
    pub builds: ScheduleReport,
    pub import: ImportReport,
    pub reconcile: ReconcileSummary,
    pub smoke: Option<SmokeResult>,
    pub elapsed_ms: u64,
}

impl DeployReport {
    pub fn is_degraded(&self) -> bool {
        self.reconcile.is_degraded()
    }
}

pub struct OrchestrationDriver {
    config: DeployConfig,
    collaborators: Collaborators,
    check_prerequisites: bool,
}

impl OrchestrationDriver {
    pub fn new(config: DeployConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            check_prerequisites: true,
        }
    }

    /// Skip the `PATH` lookup for docker/k3d/kubectl (in-memory collaborators)
    pub fn without_prerequisite_check(mut self) -> Self {
        self.check_prerequisites = false;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn targets(&self, force_all: bool) -> Result<Vec<BuildTarget>> {
        let mut targets = BuildTarget::from_configs(&self.config.targets)?;
        if force_all {
            for target in &mut targets {
                target.force_rebuild = true;
            }
        }
        Ok(targets)
    }

    fn ensure_prerequisites(&self) -> Result<()> {
        if self.check_prerequisites {
            check_prerequisites(&REQUIRED_BINARIES)?;
        }
        Ok(())
    }

    /// Full build → import → reconcile pipeline
    pub async fn deploy(&self, options: DeployOptions) -> Result<DeployReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("deploy", run_id = %run_id);
        self.deploy_run(run_id, options).instrument(span).await
    }

    async fn deploy_run(&self, run_id: Uuid, options: DeployOptions) -> Result<DeployReport> {
        let started = Instant::now();
        info!(
            run_id = %run_id,
            cluster = %self.config.cluster.name,
            force_rebuild_all = options.force_rebuild_all,
            "🚀 Starting deployment"
        );

        self.ensure_prerequisites()?;
        self.collaborators.runtime.ensure_cluster().await?;

        let targets = self.targets(options.force_rebuild_all)?;
        let oracle = FreshnessOracle::new(
            self.collaborators.store.as_ref(),
            self.collaborators.clock.as_ref(),
            self.config.build.max_age_hours,
        );
        let verdicts = oracle.assess_all(&targets).await?;

        let scheduler = BuildScheduler::new(
            Arc::clone(&self.collaborators.builder),
            Arc::clone(&self.collaborators.clock),
            self.config.build.max_parallel,
        )
        .with_no_cache(options.no_cache || self.config.build.no_cache)
        .with_log_directory(self.config.build.log_directory.clone());
        let builds = scheduler.schedule(&targets, &verdicts).await?.into_result()?;
        let just_built = builds.just_built();

        let importer = ArtifactImporter::new(
            Arc::clone(&self.collaborators.runtime),
            Arc::clone(&self.collaborators.clock),
            self.config.import.chunk_size,
            self.config.import.small_batch_threshold,
        );
        let import = importer.import(&targets, &just_built).await?;

        let mut reconciler =
            DeploymentReconciler::new(Arc::clone(&self.collaborators.runtime), &self.config);
        let reconcile = reconciler.reconcile(&just_built).await?;
        for warning in &reconcile.warnings {
            warn!(run_id = %run_id, "⚠️ {}", warning);
        }

        let smoke = if self.config.smoke.enabled && !options.skip_smoke {
            Some(match self.smoke().await {
                Ok(report) => SmokeResult::Passed(report),
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "⚠️ Smoke checks failed");
                    SmokeResult::Failed {
                        message: e.to_string(),
                    }
                }
            })
        } else {
            None
        };

        let report = DeployReport {
            run_id,
            verdicts,
            builds,
            import,
            reconcile,
            smoke,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            run_id = %run_id,
            degraded = report.is_degraded(),
            built = report.builds.scheduled_count(),
            imported = report.import.imported,
            elapsed_ms = report.elapsed_ms,
            "🎉 Deployment finished"
        );
        Ok(report)
    }

    /// Deploy with every target forced to rebuild
    pub async fn rebuild(&self, no_cache: bool) -> Result<DeployReport> {
        self.deploy(DeployOptions {
            no_cache,
            force_rebuild_all: true,
            skip_smoke: false,
        })
        .await
    }

    /// Current phase of every configured unit
    pub async fn status(&self) -> Result<Vec<UnitStatus>> {
        let names: Vec<String> = self.config.units.iter().map(|u| u.name.clone()).collect();
        self.collaborators.runtime.unit_statuses(&names).await
    }

    /// Remediation pass alone
    pub async fn fix(&self) -> Result<ReconcileSummary> {
        let mut reconciler =
            DeploymentReconciler::new(Arc::clone(&self.collaborators.runtime), &self.config);
        reconciler.remediate().await
    }

    /// Delete the cluster
    pub async fn down(&self) -> Result<()> {
        self.collaborators.runtime.delete_cluster().await
    }

    pub async fn smoke(&self) -> Result<SmokeReport> {
        SmokeChecker::new(&self.config.smoke)?.run().await
    }
}
