//! # Freshness Oracle
//!
//! Decides whether an image must be rebuilt by comparing the newest file
//! modification time under the target's source tree with the image's
//! creation time, plus an age ceiling.
//!
//! Decision order:
//! 1. image absent: `MissingArtifact`
//! 2. `force_rebuild` set: `ForcedRebuild`
//! 3. source directory absent: `SourceMissing`
//! 4. newest source file newer than the image: `SourceNewer`
//! 5. image older than `max_age_hours`: `StaleByAge`
//! 6. otherwise `UpToDate`
//!
//! All comparisons use whole seconds. A source file stamped in the same
//! second as the image does not make it stale.

use super::backend::ArtifactStore;
use super::target::BuildTarget;
use crate::clock::Clock;
use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessDecision {
    MissingArtifact,
    ForcedRebuild,
    SourceMissing,
    SourceNewer,
    StaleByAge,
    UpToDate,
}

impl StalenessDecision {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::UpToDate)
    }
}

impl fmt::Display for StalenessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MissingArtifact => "missing_artifact",
            Self::ForcedRebuild => "forced_rebuild",
            Self::SourceMissing => "source_missing",
            Self::SourceNewer => "source_newer",
            Self::StaleByAge => "stale_by_age",
            Self::UpToDate => "up_to_date",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessVerdict {
    /// Build target name
    pub target: String,
    pub decision: StalenessDecision,
    pub reason: String,
}

impl StalenessVerdict {
    fn new(target: &BuildTarget, decision: StalenessDecision, reason: impl Into<String>) -> Self {
        Self {
            target: target.name.clone(),
            decision,
            reason: reason.into(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.decision.is_stale()
    }
}

/// Newest file modification time under `path`, in whole seconds since the
/// epoch. Unreadable or empty trees yield 0.
pub fn newest_source_mtime(path: &Path) -> i64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .filter_map(|meta| meta.modified().ok())
        .filter_map(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_secs() as i64)
        .max()
        .unwrap_or(0)
}

/// Staleness verdict for one target.
///
/// `artifact_created_at` is ignored when `artifact_exists` is false. An
/// existing image with no known creation time is treated as infinitely old.
pub fn evaluate(
    target: &BuildTarget,
    artifact_exists: bool,
    artifact_created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_age_hours: u64,
) -> StalenessVerdict {
    if !artifact_exists {
        return StalenessVerdict::new(
            target,
            StalenessDecision::MissingArtifact,
            format!("image {} not found", target.artifact_ref),
        );
    }

    if target.force_rebuild {
        return StalenessVerdict::new(
            target,
            StalenessDecision::ForcedRebuild,
            "always rebuilt by policy",
        );
    }

    if !target.source_exists() {
        return StalenessVerdict::new(
            target,
            StalenessDecision::SourceMissing,
            format!("source path {} does not exist", target.source_path.display()),
        );
    }

    let source_newest = newest_source_mtime(&target.source_path);
    let (decision, reason) = classify(
        source_newest,
        artifact_created_at.map(|t| t.timestamp()).unwrap_or(0),
        now.timestamp(),
        max_age_hours,
    );
    StalenessVerdict::new(target, decision, reason)
}

/// Timestamp comparison on whole seconds since the epoch
pub fn classify(
    source_newest: i64,
    artifact_created: i64,
    now: i64,
    max_age_hours: u64,
) -> (StalenessDecision, String) {
    if source_newest > artifact_created {
        return (
            StalenessDecision::SourceNewer,
            format!(
                "source changed {}s after image was built",
                source_newest - artifact_created
            ),
        );
    }

    let age_seconds = now - artifact_created;
    let max_age_seconds = (max_age_hours as i64).saturating_mul(3600);
    if age_seconds > max_age_seconds {
        return (
            StalenessDecision::StaleByAge,
            format!(
                "image is {}h old (limit {}h)",
                age_seconds / 3600,
                max_age_hours
            ),
        );
    }

    (StalenessDecision::UpToDate, "image is current".to_string())
}

/// Runs the oracle over a whole target set against an image store
pub struct FreshnessOracle<'a> {
    store: &'a dyn ArtifactStore,
    clock: &'a dyn Clock,
    max_age_hours: u64,
}

impl<'a> FreshnessOracle<'a> {
    pub fn new(store: &'a dyn ArtifactStore, clock: &'a dyn Clock, max_age_hours: u64) -> Self {
        Self {
            store,
            clock,
            max_age_hours,
        }
    }

    /// One verdict per target, in target order
    pub async fn assess_all(&self, targets: &[BuildTarget]) -> Result<Vec<StalenessVerdict>> {
        let now = self.clock.now();
        let mut verdicts = Vec::with_capacity(targets.len());

        for target in targets {
            let created_at = self.store.exists(&target.artifact_ref).await?;
            let owned = target.clone();
            let max_age_hours = self.max_age_hours;

            // source walks touch the filesystem; keep them off the runtime threads
            let verdict = tokio::task::spawn_blocking(move || {
                evaluate(&owned, created_at.is_some(), created_at, now, max_age_hours)
            })
            .await
            .map_err(|e| DeployError::artifact(&target.artifact_ref, format!("freshness check panicked: {e}")))?;

            debug!(
                target_name = %verdict.target,
                decision = %verdict.decision,
                reason = %verdict.reason,
                "Freshness verdict"
            );
            verdicts.push(verdict);
        }

        let stale = verdicts.iter().filter(|v| v.is_stale()).count();
        info!(
            total = verdicts.len(),
            stale = stale,
            "🔍 Freshness check complete: {} of {} target(s) need a build",
            stale,
            verdicts.len()
        );

        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn touch(path: &Path, at: DateTime<Utc>) {
        let file = File::create(path).unwrap();
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(at.timestamp() as u64);
        file.set_modified(when).unwrap();
    }

    fn target_in(dir: &TempDir) -> BuildTarget {
        BuildTarget::new("orders", dir.path(), "eci/orders:latest")
    }

    #[test]
    fn test_missing_artifact_wins_over_everything() {
        let dir = TempDir::new().unwrap();
        let target = target_in(&dir).with_force_rebuild(true);
        let verdict = evaluate(&target, false, Some(now()), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::MissingArtifact);
    }

    #[test]
    fn test_force_rebuild_is_stale_even_when_current() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("app.py"), now() - Duration::hours(5));
        let target = target_in(&dir).with_force_rebuild(true);
        let verdict = evaluate(&target, true, Some(now() - Duration::hours(1)), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::ForcedRebuild);
        assert!(verdict.is_stale());
    }

    #[test]
    fn test_missing_source_path_fails_safe_to_rebuild() {
        let target = BuildTarget::new("ghost", "/definitely/not/here/eci", "eci/ghost:latest");
        let verdict = evaluate(&target, true, Some(now()), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::SourceMissing);
    }

    #[test]
    fn test_source_newer_than_image() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        touch(&dir.path().join("app/main.py"), now() - Duration::minutes(10));
        touch(&dir.path().join("requirements.txt"), now() - Duration::hours(3));

        let verdict = evaluate(&target_in(&dir), true, Some(now() - Duration::hours(1)), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::SourceNewer);
    }

    #[test]
    fn test_same_second_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let built = now() - Duration::hours(2);
        touch(&dir.path().join("main.py"), built);
        let verdict = evaluate(&target_in(&dir), true, Some(built), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::UpToDate);
    }

    #[test]
    fn test_age_ceiling() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("main.py"), now() - Duration::hours(48));
        let target = target_in(&dir);

        let old = evaluate(&target, true, Some(now() - Duration::hours(25)), now(), 24);
        assert_eq!(old.decision, StalenessDecision::StaleByAge);

        let fresh = evaluate(&target, true, Some(now() - Duration::hours(23)), now(), 24);
        assert_eq!(fresh.decision, StalenessDecision::UpToDate);
    }

    #[test]
    fn test_empty_source_defers_to_age_check() {
        let dir = TempDir::new().unwrap();
        assert_eq!(newest_source_mtime(dir.path()), 0);

        let target = target_in(&dir);
        let verdict = evaluate(&target, true, Some(now() - Duration::hours(1)), now(), 24);
        assert_eq!(verdict.decision, StalenessDecision::UpToDate);
    }

    #[test]
    fn test_newest_mtime_walks_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        let newest = now() - Duration::minutes(1);
        touch(&dir.path().join("top.txt"), now() - Duration::days(3));
        touch(&dir.path().join("a/b/c/deep.txt"), newest);
        assert_eq!(newest_source_mtime(dir.path()), newest.timestamp());
    }
}
