//! In-memory cluster runtime
//!
//! Units report a configurable phase. Imports add to the cluster's image
//! listing, restarts can flip a unit to `Running`, and units can be made to
//! become ready only some time after they were applied.

use crate::cluster::{ClusterRuntime, UnitPhase, UnitStatus};
use crate::error::{DeployError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One `unit_statuses` query, for ordering assertions
#[derive(Debug, Clone)]
pub struct StatusQuery {
    pub at: Instant,
    pub names: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeClusterState {
    cluster_exists: bool,
    ensure_calls: usize,
    delete_calls: usize,
    artifacts: HashSet<String>,
    list_artifacts_calls: usize,
    import_calls: Vec<Vec<String>>,
    applied: Vec<String>,
    applied_at: HashMap<String, Instant>,
    phases: HashMap<String, UnitPhase>,
    restarted: Vec<String>,
    rolling: Vec<String>,
    jobs_started: Vec<String>,
    status_queries: Vec<StatusQuery>,
}

pub struct FakeClusterRuntime {
    state: Arc<Mutex<FakeClusterState>>,
    /// Phase of units without an explicit phase; `None` means unknown
    default_phase: Option<UnitPhase>,
    ready_after: HashMap<String, Duration>,
    recover_on_restart: HashSet<String>,
    fail_import_call: Option<usize>,
    failing_status_queries: HashSet<usize>,
    seed_completes: bool,
}

impl Default for FakeClusterRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClusterRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeClusterState::default())),
            default_phase: None,
            ready_after: HashMap::new(),
            recover_on_restart: HashSet::new(),
            fail_import_call: None,
            failing_status_queries: HashSet::new(),
            seed_completes: true,
        }
    }

    /// Every unit without an explicit phase reports `Running` and ready
    pub fn all_units_ready(mut self) -> Self {
        self.default_phase = Some(UnitPhase::Running);
        self
    }

    pub fn with_unit(self, name: &str, phase: UnitPhase) -> Self {
        self.set_unit_phase(name, phase);
        self
    }

    pub fn with_artifacts<I, S>(self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .artifacts
            .extend(refs.into_iter().map(Into::into));
        self
    }

    pub fn with_existing_cluster(self) -> Self {
        self.state.lock().cluster_exists = true;
        self
    }

    /// Unit stays `Pending` until `delay` after it was applied
    pub fn ready_after(mut self, name: &str, delay: Duration) -> Self {
        self.ready_after.insert(name.to_string(), delay);
        self
    }

    /// A restart request turns the unit `Running`
    pub fn recovers_on_restart(mut self, name: &str) -> Self {
        self.recover_on_restart.insert(name.to_string());
        self
    }

    /// The `call`-th import call (1-based) fails
    pub fn fail_import_call(mut self, call: usize) -> Self {
        self.fail_import_call = Some(call);
        self
    }

    /// The `call`-th status query (1-based) fails as if the API server refused it
    pub fn fail_status_query(mut self, call: usize) -> Self {
        self.failing_status_queries.insert(call);
        self
    }

    /// The seed job never reports completion
    pub fn seed_never_completes(mut self) -> Self {
        self.seed_completes = false;
        self
    }

    pub fn set_unit_phase(&self, name: &str, phase: UnitPhase) {
        self.state.lock().phases.insert(name.to_string(), phase);
    }

    pub fn import_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().import_calls.clone()
    }

    pub fn list_artifacts_calls(&self) -> usize {
        self.state.lock().list_artifacts_calls
    }

    pub fn applied_units(&self) -> Vec<String> {
        self.state.lock().applied.clone()
    }

    pub fn restarted_units(&self) -> Vec<String> {
        self.state.lock().restarted.clone()
    }

    pub fn rolling_restarts(&self) -> Vec<String> {
        self.state.lock().rolling.clone()
    }

    pub fn jobs_started(&self) -> Vec<String> {
        self.state.lock().jobs_started.clone()
    }

    pub fn status_queries(&self) -> Vec<StatusQuery> {
        self.state.lock().status_queries.clone()
    }

    pub fn cluster_present(&self) -> bool {
        self.state.lock().cluster_exists
    }

    pub fn ensure_calls(&self) -> usize {
        self.state.lock().ensure_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }

    /// Forget the call journals, keeping cluster contents
    pub fn reset_journal(&self) {
        let mut state = self.state.lock();
        state.list_artifacts_calls = 0;
        state.import_calls.clear();
        state.applied.clear();
        state.restarted.clear();
        state.rolling.clear();
        state.jobs_started.clear();
        state.status_queries.clear();
    }

    fn observe(&self, state: &FakeClusterState, name: &str) -> UnitStatus {
        let phase = state
            .phases
            .get(name)
            .copied()
            .or(self.default_phase)
            .unwrap_or(UnitPhase::Unknown);

        let phase = match (self.ready_after.get(name), state.applied_at.get(name)) {
            (Some(delay), Some(applied)) if Instant::now() < *applied + *delay => UnitPhase::Pending,
            (Some(_), None) => UnitPhase::Pending,
            _ => phase,
        };

        let ready = u32::from(phase == UnitPhase::Running);
        let restarts = state.restarted.iter().filter(|n| n.as_str() == name).count() as u32;
        UnitStatus::new(name, phase)
            .with_replicas(ready, 1)
            .with_restarts(restarts)
    }
}

#[async_trait]
impl ClusterRuntime for FakeClusterRuntime {
    async fn cluster_exists(&self) -> Result<bool> {
        Ok(self.state.lock().cluster_exists)
    }

    async fn ensure_cluster(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_calls += 1;
        state.cluster_exists = true;
        Ok(())
    }

    async fn delete_cluster(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.delete_calls += 1;
        state.cluster_exists = false;
        state.artifacts.clear();
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<HashSet<String>> {
        let mut state = self.state.lock();
        state.list_artifacts_calls += 1;
        Ok(state.artifacts.clone())
    }

    async fn import(&self, artifact_refs: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        state.import_calls.push(artifact_refs.to_vec());
        if self.fail_import_call == Some(state.import_calls.len()) {
            return Err(DeployError::cluster(
                "k3d image import",
                "failed to load image into node: context deadline exceeded",
            ));
        }
        state.artifacts.extend(artifact_refs.iter().cloned());
        Ok(())
    }

    async fn apply(&self, unit: &str, _manifest: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.applied.push(unit.to_string());
        state.applied_at.insert(unit.to_string(), Instant::now());
        Ok(())
    }

    async fn unit_status(&self, name: &str) -> Result<UnitStatus> {
        let state = self.state.lock();
        Ok(self.observe(&state, name))
    }

    async fn unit_statuses(&self, names: &[String]) -> Result<Vec<UnitStatus>> {
        let mut state = self.state.lock();
        state.status_queries.push(StatusQuery {
            at: Instant::now(),
            names: names.to_vec(),
        });
        if self.failing_status_queries.contains(&state.status_queries.len()) {
            return Err(DeployError::cluster(
                "get pods",
                "The connection to the server was refused",
            ));
        }
        Ok(names.iter().map(|name| self.observe(&state, name)).collect())
    }

    async fn restart_unit(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.restarted.push(name.to_string());
        if self.recover_on_restart.contains(name) {
            state.phases.insert(name.to_string(), UnitPhase::Running);
        }
        Ok(())
    }

    async fn rolling_restart(&self, name: &str) -> Result<()> {
        self.state.lock().rolling.push(name.to_string());
        Ok(())
    }

    async fn run_one_shot_job(&self, name: &str, _manifest: &Path) -> Result<()> {
        self.state.lock().jobs_started.push(name.to_string());
        Ok(())
    }

    async fn wait_for_job_completion(&self, _name: &str, _timeout: Duration) -> Result<bool> {
        if self.seed_completes {
            Ok(true)
        } else {
            std::future::pending::<()>().await;
            Ok(false)
        }
    }
}
