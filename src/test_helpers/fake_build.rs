//! In-memory build backend
//!
//! `FakeArtifactBuilder` records every call and tracks how many builds were
//! in flight at once. When wired to a `FakeArtifactStore` it stamps each
//! successful build into the store, so a second pipeline run sees the images.

use crate::build::{ArtifactBuilder, ArtifactStore, BuildOutput, BuildTarget};
use crate::clock::Clock;
use crate::error::{DeployError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One recorded `build` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCall {
    pub target: String,
    pub no_cache: bool,
}

#[derive(Debug, Default)]
struct FakeBuilderState {
    calls: Vec<BuildCall>,
    in_flight: usize,
    max_concurrent: usize,
}

pub struct FakeArtifactBuilder {
    state: Arc<Mutex<FakeBuilderState>>,
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    store: Option<(FakeArtifactStore, Arc<dyn Clock>)>,
}

impl Default for FakeArtifactBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeArtifactBuilder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeBuilderState::default())),
            failures: HashMap::new(),
            delay: None,
            store: None,
        }
    }

    /// Make `target` fail with `log` as its captured output
    pub fn fail_target(mut self, target: &str, log: &str) -> Self {
        self.failures.insert(target.to_string(), log.to_string());
        self
    }

    /// Hold every build for `delay` (use with paused tokio time)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Record successful builds in `store`, stamped with `clock`
    pub fn with_store(mut self, store: FakeArtifactStore, clock: Arc<dyn Clock>) -> Self {
        self.store = Some((store, clock));
        self
    }

    pub fn calls(&self) -> Vec<BuildCall> {
        self.state.lock().calls.clone()
    }

    pub fn built_names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.calls().into_iter().map(|c| c.target).collect();
        names.sort();
        names
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_concurrent
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.max_concurrent = 0;
    }
}

#[async_trait]
impl ArtifactBuilder for FakeArtifactBuilder {
    async fn build(&self, target: &BuildTarget, no_cache: bool) -> Result<BuildOutput> {
        {
            let mut state = self.state.lock();
            state.calls.push(BuildCall {
                target: target.name.clone(),
                no_cache,
            });
            state.in_flight += 1;
            state.max_concurrent = state.max_concurrent.max(state.in_flight);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.state.lock().in_flight -= 1;

        if let Some(log) = self.failures.get(&target.name) {
            return Ok(BuildOutput {
                success: false,
                log: log.clone(),
            });
        }

        if let Some((store, clock)) = &self.store {
            store.insert(&target.artifact_ref, clock.now());
        }

        Ok(BuildOutput {
            success: true,
            log: format!("Successfully tagged {}", target.artifact_ref),
        })
    }
}

/// Shared image store; clones see the same images
#[derive(Debug, Clone, Default)]
pub struct FakeArtifactStore {
    images: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl FakeArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(self, artifact_ref: &str, created_at: DateTime<Utc>) -> Self {
        self.insert(artifact_ref, created_at);
        self
    }

    pub fn insert(&self, artifact_ref: &str, created_at: DateTime<Utc>) {
        self.images.lock().insert(artifact_ref.to_string(), created_at);
    }

    pub fn remove(&self, artifact_ref: &str) {
        self.images.lock().remove(artifact_ref);
    }

    pub fn created_at(&self, artifact_ref: &str) -> Option<DateTime<Utc>> {
        self.images.lock().get(artifact_ref).copied()
    }

    /// Make every query fail, as if the daemon were down
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    fn check_available(&self, artifact: &str) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(DeployError::artifact(artifact, "image store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn exists(&self, artifact_ref: &str) -> Result<Option<DateTime<Utc>>> {
        self.check_available(artifact_ref)?;
        Ok(self.created_at(artifact_ref))
    }
}
