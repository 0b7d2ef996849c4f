//! # Deployment Reconciler
//!
//! Drives one run through `Applying → WaitingInfra → WaitingApps →
//! Remediating → Done | Failed`.
//!
//! Every wait is a deadline: the unit statuses are polled until they are
//! ready or the deadline passes, and the deadline always wins. A failed
//! status query is logged and polled again; it never ends a wait. An infra
//! timeout is fatal. An app timeout moves to remediation, which restarts
//! unhealthy units, waits out a grace period and accepts a degraded run when
//! enough units are running. Seeding runs last and can only produce warnings.

use super::states::ReconcileState;
use super::summary::{
    diagnostic_dump, running_count, ReconcileOutcome, ReconcileSummary, ReconcileWarning,
    SeedOutcome,
};
use crate::cluster::{ClusterRuntime, UnitStatus};
use crate::config::{DeployConfig, SufficiencyThreshold, UnitConfig};
use crate::error::{DeployError, Result};
use crate::logging::log_unit_operation;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SeedSettings {
    pub job_name: String,
    pub manifest: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub infra_timeout: Duration,
    pub app_timeout: Duration,
    pub remediation_grace: Duration,
    pub poll_interval: Duration,
    pub sufficiency: SufficiencyThreshold,
    /// `None` disables seeding
    pub seed: Option<SeedSettings>,
}

impl From<&DeployConfig> for ReconcilerSettings {
    fn from(config: &DeployConfig) -> Self {
        let seed = config.seed.enabled.then(|| SeedSettings {
            job_name: config.seed.job_name.clone(),
            manifest: config.seed.manifest.clone(),
            timeout: Duration::from_secs(config.seed.timeout_seconds),
        });
        Self {
            infra_timeout: config.reconcile.infra_timeout(),
            app_timeout: config.reconcile.app_timeout(),
            remediation_grace: config.reconcile.remediation_grace(),
            poll_interval: config.reconcile.poll_interval(),
            sufficiency: config.reconcile.sufficiency,
            seed,
        }
    }
}

/// Outcome of a bounded readiness wait
enum WaitResult {
    Ready(Vec<UnitStatus>),
    TimedOut(Vec<UnitStatus>),
}

pub struct DeploymentReconciler {
    runtime: Arc<dyn ClusterRuntime>,
    /// Infra units first, then apps, each in configuration order
    units: Vec<UnitConfig>,
    settings: ReconcilerSettings,
    state: ReconcileState,
}

impl DeploymentReconciler {
    pub fn new(runtime: Arc<dyn ClusterRuntime>, config: &DeployConfig) -> Self {
        let units = config
            .infra_units()
            .chain(config.app_units())
            .cloned()
            .collect();
        Self {
            runtime,
            units,
            settings: ReconcilerSettings::from(config),
            state: ReconcileState::default(),
        }
    }

    pub fn with_settings(mut self, settings: ReconcilerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    fn transition(&mut self, next: ReconcileState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid reconcile transition {} -> {}",
            self.state,
            next
        );
        info!(from = %self.state, to = %next, "Reconcile state transition");
        self.state = next;
    }

    fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    fn infra_names(&self) -> Vec<String> {
        self.units
            .iter()
            .filter(|u| u.tier == crate::config::UnitTier::Infra)
            .map(|u| u.name.clone())
            .collect()
    }

    /// Full run. `refreshed` names the build targets rebuilt this run; units
    /// running them get a rolling restart after apply.
    pub async fn reconcile(&mut self, refreshed: &HashSet<String>) -> Result<ReconcileSummary> {
        let started = Instant::now();
        self.state = ReconcileState::Applying;
        let mut warnings = Vec::new();

        if let Err(e) = self.apply_all(refreshed, &mut warnings).await {
            self.transition(ReconcileState::Failed);
            return Err(e);
        }
        self.transition(ReconcileState::WaitingInfra);

        let infra = self.infra_names();
        let waited = self.wait_until_ready(&infra, self.settings.infra_timeout).await;
        if let WaitResult::TimedOut(pending) = waited {
            self.transition(ReconcileState::Failed);
            let all = match self.runtime.unit_statuses(&self.unit_names()).await {
                Ok(all) => all,
                Err(e) => {
                    warn!(error = %e, "Could not collect unit status for the failure dump");
                    pending.clone()
                }
            };
            let pending: Vec<String> = pending
                .iter()
                .filter(|s| !s.is_ready())
                .map(|s| s.name.clone())
                .collect();
            error!(pending = %pending.join(", "), "❌ Infrastructure units not ready");
            return Err(DeployError::InfraTimeout {
                pending,
                timeout_seconds: self.settings.infra_timeout.as_secs(),
                diagnostics: diagnostic_dump(&all),
            });
        }
        info!("✅ Infrastructure ready");
        self.transition(ReconcileState::WaitingApps);

        let all = self.unit_names();
        let waited = self.wait_until_ready(&all, self.settings.app_timeout).await;
        let (outcome, units, remediated) = match waited {
            WaitResult::Ready(statuses) => {
                info!("✅ All {} units ready", statuses.len());
                self.transition(ReconcileState::Done);
                (ReconcileOutcome::Healthy, statuses, Vec::new())
            }
            WaitResult::TimedOut(statuses) => {
                let not_ready: Vec<String> = statuses
                    .iter()
                    .filter(|s| !s.is_ready())
                    .map(|s| s.name.clone())
                    .collect();
                warn!(not_ready = %not_ready.join(", "), "⚠️ Units not ready, remediating");
                warnings.push(ReconcileWarning::AppReadinessTimeout {
                    not_ready,
                    timeout_seconds: self.settings.app_timeout.as_secs(),
                });
                self.transition(ReconcileState::Remediating);
                self.remediation_pass(statuses, &mut warnings).await?
            }
        };

        let seed = self.run_seed(&mut warnings).await;

        Ok(ReconcileSummary {
            state: self.state,
            outcome,
            units,
            remediated,
            seed,
            warnings,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Remediation alone, against whatever the cluster currently shows
    pub async fn remediate(&mut self) -> Result<ReconcileSummary> {
        let started = Instant::now();
        self.state = ReconcileState::Remediating;
        let mut warnings = Vec::new();

        let statuses = self.runtime.unit_statuses(&self.unit_names()).await?;
        let (outcome, units, remediated) = self.remediation_pass(statuses, &mut warnings).await?;

        Ok(ReconcileSummary {
            state: self.state,
            outcome,
            units,
            remediated,
            seed: SeedOutcome::Skipped,
            warnings,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn apply_all(
        &self,
        refreshed: &HashSet<String>,
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Result<()> {
        for unit in &self.units {
            self.runtime.apply(&unit.name, &unit.manifest).await?;
            log_unit_operation("apply", &unit.name, "submitted", Some(&unit.tier.to_string()));
        }

        let to_roll = self.units.iter().filter(|u| {
            u.target
                .as_ref()
                .is_some_and(|target| refreshed.contains(target))
        });
        for unit in to_roll {
            match self.runtime.rolling_restart(&unit.name).await {
                Ok(()) => log_unit_operation("rolling_restart", &unit.name, "requested", None),
                Err(e) => {
                    warn!(unit = %unit.name, error = %e, "Rolling restart failed");
                    warnings.push(ReconcileWarning::RestartFailed {
                        unit: unit.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Poll `names` until all are ready or `limit` elapses. Query failures
    /// keep the last observed statuses.
    async fn wait_until_ready(&self, names: &[String], limit: Duration) -> WaitResult {
        let deadline = Instant::now() + limit;
        let mut last: Vec<UnitStatus> = names.iter().map(|n| UnitStatus::unknown(n.clone())).collect();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.runtime.unit_statuses(names)).await {
                Ok(Ok(statuses)) => {
                    last = statuses;
                    if last.iter().all(UnitStatus::is_ready) {
                        return WaitResult::Ready(last);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Status query failed, polling again"),
                Err(_) => return WaitResult::TimedOut(last),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitResult::TimedOut(last);
            }
            debug!(
                waiting = last.iter().filter(|s| !s.is_ready()).count(),
                remaining_ms = remaining.as_millis() as u64,
                "Waiting for units"
            );
            sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }

    /// Restart unhealthy units, wait out the grace period, then judge
    async fn remediation_pass(
        &mut self,
        statuses: Vec<UnitStatus>,
        warnings: &mut Vec<ReconcileWarning>,
    ) -> Result<(ReconcileOutcome, Vec<UnitStatus>, Vec<String>)> {
        let unhealthy: Vec<String> = statuses
            .iter()
            .filter(|s| !s.phase.is_healthy())
            .map(|s| s.name.clone())
            .collect();

        for name in &unhealthy {
            match self.runtime.restart_unit(name).await {
                Ok(()) => log_unit_operation("restart", name, "requested", None),
                Err(e) => {
                    warn!(unit = %name, error = %e, "Restart request failed");
                    warnings.push(ReconcileWarning::RestartFailed {
                        unit: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if !unhealthy.is_empty() {
            info!(
                restarted = %unhealthy.join(", "),
                grace_seconds = self.settings.remediation_grace.as_secs(),
                "🔧 Restarted {} unit(s), waiting for grace period",
                unhealthy.len()
            );
            sleep(self.settings.remediation_grace).await;
        }

        let after = self.runtime.unit_statuses(&self.unit_names()).await?;
        let total = after.len();
        let running = running_count(&after);
        let required = self.settings.sufficiency.required(total);
        let not_running: Vec<String> = after
            .iter()
            .filter(|s| s.phase != crate::cluster::UnitPhase::Running)
            .map(|s| s.name.clone())
            .collect();

        if running < required {
            self.transition(ReconcileState::Failed);
            error!(
                running = running,
                required = required,
                total = total,
                "❌ Remediation insufficient"
            );
            return Err(DeployError::RemediationInsufficient {
                running,
                required,
                total,
                not_running,
                diagnostics: diagnostic_dump(&after),
            });
        }

        self.transition(ReconcileState::Done);
        let outcome = if after.iter().all(UnitStatus::is_ready) {
            ReconcileOutcome::Healthy
        } else {
            warn!(
                running = running,
                total = total,
                not_running = %not_running.join(", "),
                "⚠️ Degraded success: {}/{} units running",
                running,
                total
            );
            warnings.push(ReconcileWarning::DegradedSuccess {
                running,
                required,
                total,
                not_running,
            });
            ReconcileOutcome::Degraded
        };

        Ok((outcome, after, unhealthy))
    }

    async fn run_seed(&self, warnings: &mut Vec<ReconcileWarning>) -> SeedOutcome {
        let Some(seed) = &self.settings.seed else {
            return SeedOutcome::Skipped;
        };

        if let Err(e) = self.runtime.run_one_shot_job(&seed.job_name, &seed.manifest).await {
            warn!(job = %seed.job_name, error = %e, "⚠️ Seed job could not be started");
            warnings.push(ReconcileWarning::SeedFailed {
                job: seed.job_name.clone(),
                message: e.to_string(),
            });
            return SeedOutcome::Failed {
                message: e.to_string(),
            };
        }

        let waited = timeout(
            seed.timeout,
            self.runtime
                .wait_for_job_completion(&seed.job_name, seed.timeout),
        )
        .await;

        match waited {
            Ok(Ok(true)) => {
                info!(job = %seed.job_name, "🌱 Seed job completed");
                SeedOutcome::Completed
            }
            Ok(Ok(false)) | Err(_) => {
                warn!(
                    job = %seed.job_name,
                    timeout_seconds = seed.timeout.as_secs(),
                    "⚠️ Seed job did not complete in time"
                );
                warnings.push(ReconcileWarning::SeedTimeout {
                    job: seed.job_name.clone(),
                    timeout_seconds: seed.timeout.as_secs(),
                });
                SeedOutcome::TimedOut {
                    timeout_seconds: seed.timeout.as_secs(),
                }
            }
            Ok(Err(e)) => {
                warn!(job = %seed.job_name, error = %e, "⚠️ Seed job wait failed");
                warnings.push(ReconcileWarning::SeedFailed {
                    job: seed.job_name.clone(),
                    message: e.to_string(),
                });
                SeedOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::UnitPhase;
    use crate::test_helpers::FakeClusterRuntime;

    fn config() -> DeployConfig {
        DeployConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_run_applies_infra_first() {
        let runtime = Arc::new(FakeClusterRuntime::new().all_units_ready());
        let mut reconciler = DeploymentReconciler::new(runtime.clone(), &config());

        let summary = reconciler.reconcile(&HashSet::new()).await.unwrap();

        assert_eq!(summary.outcome, ReconcileOutcome::Healthy);
        assert_eq!(summary.state, ReconcileState::Done);
        assert_eq!(summary.seed, SeedOutcome::Completed);
        let applied = runtime.applied_units();
        assert_eq!(&applied[..2], &["postgres".to_string(), "redis".to_string()]);
        assert_eq!(applied.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_units_get_rolling_restart() {
        let runtime = Arc::new(FakeClusterRuntime::new().all_units_ready());
        let mut reconciler = DeploymentReconciler::new(runtime.clone(), &config());
        let refreshed = HashSet::from(["orders".to_string(), "seed".to_string()]);

        reconciler.reconcile(&refreshed).await.unwrap();
        assert_eq!(runtime.rolling_restarts(), vec!["orders"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infra_timeout_is_fatal_with_dump() {
        let runtime = Arc::new(
            FakeClusterRuntime::new()
                .all_units_ready()
                .with_unit("postgres", UnitPhase::Pending),
        );
        let mut reconciler = DeploymentReconciler::new(runtime.clone(), &config());

        let err = reconciler.reconcile(&HashSet::new()).await.unwrap_err();
        assert_eq!(reconciler.state(), ReconcileState::Failed);
        match err {
            DeployError::InfraTimeout {
                pending,
                diagnostics,
                timeout_seconds,
            } => {
                assert_eq!(pending, vec!["postgres"]);
                assert_eq!(timeout_seconds, 60);
                assert_eq!(diagnostics.lines.len(), 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runtime.restarted_units().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_timeout_is_only_a_warning() {
        let runtime = Arc::new(FakeClusterRuntime::new().all_units_ready().seed_never_completes());
        let mut reconciler = DeploymentReconciler::new(runtime, &config());

        let summary = reconciler.reconcile(&HashSet::new()).await.unwrap();
        assert_eq!(summary.seed, SeedOutcome::TimedOut { timeout_seconds: 30 });
        assert!(summary
            .warnings
            .iter()
            .any(|w| matches!(w, ReconcileWarning::SeedTimeout { .. })));
        assert_eq!(summary.outcome, ReconcileOutcome::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_recovers_flaky_unit() {
        let runtime = Arc::new(
            FakeClusterRuntime::new()
                .all_units_ready()
                .with_unit("orders", UnitPhase::Failed)
                .recovers_on_restart("orders"),
        );
        let mut reconciler = DeploymentReconciler::new(runtime.clone(), &config());

        let summary = reconciler.reconcile(&HashSet::new()).await.unwrap();
        assert_eq!(summary.outcome, ReconcileOutcome::Healthy);
        assert_eq!(summary.remediated, vec!["orders"]);
        assert_eq!(runtime.restarted_units(), vec!["orders"]);
        assert!(summary
            .warnings
            .iter()
            .any(|w| matches!(w, ReconcileWarning::AppReadinessTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standalone_remediation_with_everything_healthy() {
        let runtime = Arc::new(FakeClusterRuntime::new().all_units_ready());
        let mut reconciler = DeploymentReconciler::new(runtime.clone(), &config());

        let summary = reconciler.remediate().await.unwrap();
        assert_eq!(summary.outcome, ReconcileOutcome::Healthy);
        assert!(summary.remediated.is_empty());
        assert_eq!(summary.seed, SeedOutcome::Skipped);
        assert!(runtime.applied_units().is_empty());
    }
}
