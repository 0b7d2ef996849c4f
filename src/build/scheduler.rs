//! # Build Scheduler
//!
//! Runs stale targets through an [`ArtifactBuilder`] with at most
//! `max_parallel` builds in flight. Admission is a sliding window: a new job
//! starts as soon as any running job releases its permit, so the pool stays
//! full until the queue drains.
//!
//! Every job's output is written to `<log_directory>/<target>.log`. Failed
//! targets are gathered in a [`FailureCollector`] shared by all jobs; the
//! run fails as a whole once every admitted job has finished.

use super::backend::ArtifactBuilder;
use super::freshness::StalenessVerdict;
use super::target::BuildTarget;
use crate::clock::Clock;
use crate::error::{DeployError, FailedBuild, Result};
use crate::logging::log_build_operation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildJobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl BuildJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for BuildJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One admitted build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub target: String,
    pub status: BuildJobStatus,
    /// Captured output location, when a log directory is configured
    pub log_ref: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BuildJob {
    fn pending(target: &str, log_ref: Option<PathBuf>) -> Self {
        Self {
            target: target.to_string(),
            status: BuildJobStatus::Pending,
            log_ref,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Live view of every job in the current run
#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: DashMap<String, BuildJob>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, job: BuildJob) {
        self.jobs.insert(job.target.clone(), job);
    }

    fn mark_running(&self, target: &str, at: DateTime<Utc>) {
        if let Some(mut job) = self.jobs.get_mut(target) {
            job.status = BuildJobStatus::Running;
            job.started_at = Some(at);
        }
    }

    fn mark_finished(&self, target: &str, status: BuildJobStatus, at: DateTime<Utc>) {
        if let Some(mut job) = self.jobs.get_mut(target) {
            job.status = status;
            job.finished_at = Some(at);
        }
    }

    pub fn get(&self, target: &str) -> Option<BuildJob> {
        self.jobs.get(target).map(|job| job.clone())
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.status == BuildJobStatus::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Failed builds appended by concurrent jobs
#[derive(Debug, Default)]
pub struct FailureCollector {
    failed: Mutex<Vec<FailedBuild>>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, target: &str, log: String) {
        self.failed.lock().push(FailedBuild {
            target: target.to_string(),
            log,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failed.lock().is_empty()
    }

    /// Failures sorted by target name
    pub fn drain(&self) -> Vec<FailedBuild> {
        let mut failed = std::mem::take(&mut *self.failed.lock());
        failed.sort_by(|a, b| a.target.cmp(&b.target));
        failed
    }
}

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Admitted jobs, in target order
    pub jobs: Vec<BuildJob>,
    /// Targets whose verdict was up to date
    pub skipped: Vec<String>,
    pub failed: Vec<FailedBuild>,
    pub elapsed_ms: u64,
}

impl ScheduleReport {
    /// Names of targets built successfully in this run
    pub fn just_built(&self) -> HashSet<String> {
        self.jobs
            .iter()
            .filter(|job| job.status == BuildJobStatus::Succeeded)
            .map(|job| job.target.clone())
            .collect()
    }

    pub fn scheduled_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// `BuildFailure` carrying every failed target's log when anything failed
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(DeployError::BuildFailure {
                failed: self.failed,
            })
        }
    }
}

pub struct BuildScheduler {
    builder: Arc<dyn ArtifactBuilder>,
    clock: Arc<dyn Clock>,
    max_parallel: usize,
    no_cache: bool,
    log_directory: Option<PathBuf>,
}

impl BuildScheduler {
    pub fn new(builder: Arc<dyn ArtifactBuilder>, clock: Arc<dyn Clock>, max_parallel: usize) -> Self {
        Self {
            builder,
            clock,
            max_parallel: max_parallel.max(1),
            no_cache: false,
            log_directory: None,
        }
    }

    /// Pass `--no-cache` to every build of the run
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = Some(dir.into());
        self
    }

    /// Build every target whose verdict is stale. Targets without a verdict
    /// are built.
    pub async fn schedule(
        &self,
        targets: &[BuildTarget],
        verdicts: &[StalenessVerdict],
    ) -> Result<ScheduleReport> {
        self.schedule_on(Arc::new(JobBoard::new()), targets, verdicts).await
    }

    /// [`schedule`](Self::schedule) recording jobs on a caller-supplied board,
    /// so the run can be watched while it is in flight. Each run needs its own
    /// board.
    pub async fn schedule_on(
        &self,
        board: Arc<JobBoard>,
        targets: &[BuildTarget],
        verdicts: &[StalenessVerdict],
    ) -> Result<ScheduleReport> {
        let started = Instant::now();
        let verdicts: HashMap<&str, &StalenessVerdict> =
            verdicts.iter().map(|v| (v.target.as_str(), v)).collect();

        let (admitted, skipped): (Vec<&BuildTarget>, Vec<&BuildTarget>) = targets
            .iter()
            .partition(|t| verdicts.get(t.name.as_str()).map_or(true, |v| v.is_stale()));

        let skipped: Vec<String> = skipped.iter().map(|t| t.name.clone()).collect();

        if admitted.is_empty() {
            info!("✅ All images up to date, nothing to build");
            return Ok(ScheduleReport {
                skipped,
                elapsed_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        if let Some(dir) = &self.log_directory {
            tokio::fs::create_dir_all(dir).await?;
        }

        for target in &admitted {
            board.insert(BuildJob::pending(&target.name, self.log_ref(&target.name)));
        }

        info!(
            builds = admitted.len(),
            max_parallel = self.max_parallel,
            no_cache = self.no_cache,
            "🔨 Building {} image(s), up to {} at a time",
            admitted.len(),
            self.max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let failures = Arc::new(FailureCollector::new());
        let mut join_set = JoinSet::new();
        let mut task_targets = HashMap::new();

        for target in admitted.iter().map(|t| (*t).clone()) {
            // blocks admission until a running job releases its slot
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| DeployError::artifact(&target.artifact_ref, e.to_string()))?;

            let name = target.name.clone();
            let job = BuildJobRunner {
                target,
                builder: Arc::clone(&self.builder),
                clock: Arc::clone(&self.clock),
                board: Arc::clone(&board),
                failures: Arc::clone(&failures),
                no_cache: self.no_cache,
                log_ref: self.log_ref(&name),
            };
            let handle = join_set.spawn(async move {
                let _permit = permit;
                job.run().await;
            });
            task_targets.insert(handle.id(), name);
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(join_error) = joined {
                let target = task_targets
                    .get(&join_error.id())
                    .cloned()
                    .unwrap_or_else(|| "<unknown>".to_string());
                error!(target_name = %target, error = %join_error, "Build task aborted");
                board.mark_finished(&target, BuildJobStatus::Failed, self.clock.now());
                failures.record(&target, format!("build task aborted: {join_error}"));
            }
        }

        let jobs: Vec<BuildJob> = admitted
            .iter()
            .filter_map(|t| board.get(&t.name))
            .collect();
        let failed = failures.drain();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if failed.is_empty() {
            info!(builds = jobs.len(), elapsed_ms = elapsed_ms, "✅ All builds succeeded");
        } else {
            let names: Vec<&str> = failed.iter().map(|f| f.target.as_str()).collect();
            error!(
                failed = %names.join(", "),
                "❌ {} of {} build(s) failed",
                failed.len(),
                jobs.len()
            );
        }

        Ok(ScheduleReport {
            jobs,
            skipped,
            failed,
            elapsed_ms,
        })
    }

    fn log_ref(&self, target: &str) -> Option<PathBuf> {
        self.log_directory
            .as_ref()
            .map(|dir| dir.join(format!("{target}.log")))
    }
}

/// State owned by one spawned build
struct BuildJobRunner {
    target: BuildTarget,
    builder: Arc<dyn ArtifactBuilder>,
    clock: Arc<dyn Clock>,
    board: Arc<JobBoard>,
    failures: Arc<FailureCollector>,
    no_cache: bool,
    log_ref: Option<PathBuf>,
}

impl BuildJobRunner {
    async fn run(self) {
        let name = self.target.name.as_str();
        let started = Instant::now();
        self.board.mark_running(name, self.clock.now());
        log_build_operation("build", name, "running", None, None);

        let (success, log) = match self.builder.build(&self.target, self.no_cache).await {
            Ok(output) => (output.success, output.log),
            Err(e) => (false, e.to_string()),
        };

        if let Some(path) = &self.log_ref {
            if let Err(e) = tokio::fs::write(path, &log).await {
                warn!(target_name = %name, path = %path.display(), error = %e, "Could not write build log");
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = if success {
            BuildJobStatus::Succeeded
        } else {
            self.failures.record(name, log);
            BuildJobStatus::Failed
        };
        self.board.mark_finished(name, status, self.clock.now());
        log_build_operation("build", name, &status.to_string(), Some(duration_ms), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::freshness::StalenessDecision;
    use crate::clock::SystemClock;
    use crate::test_helpers::FakeArtifactBuilder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn targets(names: &[&str]) -> Vec<BuildTarget> {
        names
            .iter()
            .map(|n| BuildTarget::new(*n, format!("/src/{n}"), format!("eci/{n}:latest")))
            .collect()
    }

    fn verdict(name: &str, decision: StalenessDecision) -> StalenessVerdict {
        StalenessVerdict {
            target: name.to_string(),
            decision,
            reason: String::new(),
        }
    }

    #[tokio::test]
    async fn test_only_stale_targets_are_built() {
        let builder = Arc::new(FakeArtifactBuilder::new());
        let scheduler = BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 4);

        let report = scheduler
            .schedule(
                &targets(&["a", "b", "c"]),
                &[
                    verdict("a", StalenessDecision::UpToDate),
                    verdict("b", StalenessDecision::SourceNewer),
                    verdict("c", StalenessDecision::MissingArtifact),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.skipped, vec!["a"]);
        assert_eq!(report.just_built(), HashSet::from(["b".to_string(), "c".to_string()]));
        assert_eq!(builder.built_names_sorted(), vec!["b", "c"]);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failures_collected_and_logs_written() {
        let dir = TempDir::new().unwrap();
        let builder = Arc::new(
            FakeArtifactBuilder::new()
                .fail_target("b", "Step 4/9 : RUN pip install\nERROR: no matching distribution"),
        );
        let scheduler = BuildScheduler::new(builder, Arc::new(SystemClock), 2)
            .with_log_directory(dir.path());

        let all = targets(&["a", "b", "c"]);
        let report = scheduler.schedule(&all, &[]).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, "b");
        let job = report.jobs.iter().find(|j| j.target == "b").unwrap();
        assert_eq!(job.status, BuildJobStatus::Failed);
        let log = std::fs::read_to_string(job.log_ref.as_ref().unwrap()).unwrap();
        assert!(log.contains("no matching distribution"));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, DeployError::BuildFailure { ref failed } if failed[0].target == "b"));
    }

    #[tokio::test]
    async fn test_no_cache_passed_to_every_build() {
        let builder = Arc::new(FakeArtifactBuilder::new());
        let scheduler =
            BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 3).with_no_cache(true);
        scheduler.schedule(&targets(&["a", "b"]), &[]).await.unwrap();
        assert!(builder.calls().iter().all(|call| call.no_cache));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_bound() {
        let builder = Arc::new(FakeArtifactBuilder::new().with_delay(Duration::from_secs(3)));
        let scheduler = BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 3);
        let names: Vec<String> = (0..10).map(|i| format!("svc{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = scheduler.schedule(&targets(&refs), &[]).await.unwrap();
        assert_eq!(report.jobs.len(), 10);
        assert_eq!(builder.max_concurrent(), 3);
        assert!(report
            .jobs
            .iter()
            .all(|j| j.status == BuildJobStatus::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_runs_keep_their_own_jobs() {
        let builder = Arc::new(FakeArtifactBuilder::new().with_delay(Duration::from_secs(2)));
        let scheduler = BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 4);
        let first = targets(&["a", "b"]);
        let second = targets(&["c"]);

        let (first_report, second_report) = tokio::join!(
            scheduler.schedule(&first, &[]),
            scheduler.schedule(&second, &[]),
        );

        let names = |report: &ScheduleReport| -> Vec<String> {
            report.jobs.iter().map(|j| j.target.clone()).collect()
        };
        assert_eq!(names(&first_report.unwrap()), vec!["a", "b"]);
        assert_eq!(names(&second_report.unwrap()), vec!["c"]);
        assert_eq!(builder.calls().len(), 3);
    }

    #[test]
    fn test_failure_collector_is_sorted() {
        let collector = FailureCollector::new();
        collector.record("zeta", String::new());
        collector.record("alpha", String::new());
        let drained = collector.drain();
        assert_eq!(drained[0].target, "alpha");
        assert!(collector.is_empty());
    }
}
