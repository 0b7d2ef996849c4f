//! # Deployment Configuration
//!
//! YAML-driven configuration for the build, import and reconciliation
//! pipeline. Every knob has a default matching the platform's observed
//! behaviour, so a missing file still yields a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eci_deploy::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_parallel = manager.config().build.max_parallel;
//! let infra_timeout = manager.config().reconcile.infra_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring eci-deploy.yaml
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    /// k3d cluster identity and bootstrap settings
    pub cluster: ClusterConfig,

    /// Image build policy
    pub build: BuildConfig,

    /// Image import batching
    pub import: ImportConfig,

    /// Readiness waits and remediation policy
    pub reconcile: ReconcileConfig,

    /// One-shot data seeding job
    pub seed: SeedConfig,

    /// Post-deploy gateway checks
    pub smoke: SmokeConfig,

    /// Build targets, one per image
    pub targets: Vec<TargetConfig>,

    /// Deployment units in apply order
    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    pub namespace: String,
    pub agents: u32,
    pub load_balancer_port: u16,
    /// Applied once after the cluster is created
    pub namespace_manifest: Option<PathBuf>,
    /// Upper bound for any single kubectl/k3d call
    pub command_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    pub max_parallel: usize,
    pub max_age_hours: u64,
    /// Passed through to every build of the run
    pub no_cache: bool,
    /// Per-target build logs land here as `<target>.log`
    pub log_directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub small_batch_threshold: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub infra_timeout_seconds: u64,
    pub app_timeout_seconds: u64,
    pub remediation_grace_seconds: u64,
    pub poll_interval_seconds: u64,
    pub sufficiency: SufficiencyThreshold,
}

impl ReconcileConfig {
    pub fn infra_timeout(&self) -> Duration {
        Duration::from_secs(self.infra_timeout_seconds)
    }

    pub fn app_timeout(&self) -> Duration {
        Duration::from_secs(self.app_timeout_seconds)
    }

    pub fn remediation_grace(&self) -> Duration {
        Duration::from_secs(self.remediation_grace_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

/// How many units must be running after remediation to accept a degraded run.
///
/// Written in YAML as a single-key map, `{ratio: 0.85}` or `{count: 7}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "SufficiencyRepr", into = "SufficiencyRepr")]
pub enum SufficiencyThreshold {
    /// Fixed number of running units
    Count(usize),
    /// Fraction of the unit set, rounded up
    Ratio(f64),
}

impl SufficiencyThreshold {
    /// Units required to be running out of `total`
    pub fn required(&self, total: usize) -> usize {
        match *self {
            Self::Count(count) => count,
            Self::Ratio(ratio) => {
                let exact = ratio * total as f64;
                // products like 0.85 * 20 can land just above the integer
                (exact - 1e-9).ceil().max(0.0) as usize
            }
        }
    }
}

/// Map form of [`SufficiencyThreshold`]; exactly one key must be present
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct SufficiencyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ratio: Option<f64>,
}

impl TryFrom<SufficiencyRepr> for SufficiencyThreshold {
    type Error = String;

    fn try_from(repr: SufficiencyRepr) -> Result<Self, Self::Error> {
        match (repr.count, repr.ratio) {
            (Some(count), None) => Ok(Self::Count(count)),
            (None, Some(ratio)) => Ok(Self::Ratio(ratio)),
            (Some(_), Some(_)) => Err("sufficiency takes either `count` or `ratio`, not both".to_string()),
            (None, None) => Err("sufficiency needs a `count` or a `ratio`".to_string()),
        }
    }
}

impl From<SufficiencyThreshold> for SufficiencyRepr {
    fn from(threshold: SufficiencyThreshold) -> Self {
        match threshold {
            SufficiencyThreshold::Count(count) => Self {
                count: Some(count),
                ratio: None,
            },
            SufficiencyThreshold::Ratio(ratio) => Self {
                count: None,
                ratio: Some(ratio),
            },
        }
    }
}

impl Default for SufficiencyThreshold {
    fn default() -> Self {
        Self::Ratio(DEFAULT_SUFFICIENCY_RATIO)
    }
}

impl fmt::Display for SufficiencyThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count} units"),
            Self::Ratio(ratio) => write!(f, "{:.0}% of units", ratio * 100.0),
        }
    }
}

impl FromStr for SufficiencyThreshold {
    type Err = String;

    /// `7` is a count, `0.85` is a ratio
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('.') {
            s.parse::<f64>()
                .map(Self::Ratio)
                .map_err(|e| format!("invalid ratio: {e}"))
        } else {
            s.parse::<usize>()
                .map(Self::Count)
                .map_err(|e| format!("invalid count: {e}"))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub job_name: String,
    pub manifest: PathBuf,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmokeConfig {
    pub enabled: bool,
    pub gateway_url: String,
    pub username: String,
    pub retries: u32,
    pub retry_delay_seconds: u64,
    pub request_timeout_seconds: u64,
}

/// One image build definition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetConfig {
    pub name: String,
    pub source_path: PathBuf,
    pub image: String,
    #[serde(default)]
    pub force_rebuild: bool,
    /// Defaults to `<source_path>/Dockerfile`
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitTier {
    /// Storage and cache; must be ready before any application unit
    Infra,
    App,
}

impl fmt::Display for UnitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infra => write!(f, "infra"),
            Self::App => write!(f, "app"),
        }
    }
}

/// One workload in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnitConfig {
    pub name: String,
    pub tier: UnitTier,
    pub manifest: PathBuf,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Build target whose image this unit runs
    #[serde(default)]
    pub target: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            agents: DEFAULT_CLUSTER_AGENTS,
            load_balancer_port: DEFAULT_LOAD_BALANCER_PORT,
            namespace_manifest: Some(PathBuf::from("k8s/namespace.yaml")),
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL_BUILDS,
            max_age_hours: DEFAULT_IMAGE_MAX_AGE_HOURS,
            no_cache: false,
            log_directory: PathBuf::from("log/builds"),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_IMPORT_CHUNK_SIZE,
            small_batch_threshold: DEFAULT_IMPORT_SMALL_BATCH,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            infra_timeout_seconds: DEFAULT_INFRA_TIMEOUT_SECONDS,
            app_timeout_seconds: DEFAULT_APP_TIMEOUT_SECONDS,
            remediation_grace_seconds: DEFAULT_REMEDIATION_GRACE_SECONDS,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            sufficiency: SufficiencyThreshold::default(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            job_name: SEED_JOB_NAME.to_string(),
            manifest: PathBuf::from("k8s/seed-job.yaml"),
            timeout_seconds: DEFAULT_SEED_TIMEOUT_SECONDS,
        }
    }
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            username: "smoke".to_string(),
            retries: DEFAULT_SMOKE_RETRIES,
            retry_delay_seconds: DEFAULT_SMOKE_RETRY_DELAY_SECONDS,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        let image = |name: &str| format!("{IMAGE_PREFIX}/{name}:{IMAGE_TAG}");

        let targets: Vec<TargetConfig> = APP_SERVICES
            .iter()
            .chain(std::iter::once(&SEED_TARGET))
            .map(|name| TargetConfig {
                name: (*name).to_string(),
                source_path: PathBuf::from("services").join(name),
                image: image(name),
                force_rebuild: ALWAYS_REBUILD_TARGETS.contains(name),
                dockerfile: None,
            })
            .collect();

        let infra = INFRA_UNITS.iter().map(|name| UnitConfig {
            name: (*name).to_string(),
            tier: UnitTier::Infra,
            manifest: PathBuf::from("k8s").join(format!("{name}.yaml")),
            replicas: 1,
            target: None,
        });
        let apps = APP_SERVICES.iter().map(|name| UnitConfig {
            name: (*name).to_string(),
            tier: UnitTier::App,
            manifest: PathBuf::from("k8s").join(format!("{name}.yaml")),
            replicas: 1,
            target: Some((*name).to_string()),
        });

        Self {
            cluster: ClusterConfig::default(),
            build: BuildConfig::default(),
            import: ImportConfig::default(),
            reconcile: ReconcileConfig::default(),
            seed: SeedConfig::default(),
            smoke: SmokeConfig::default(),
            targets,
            units: infra.chain(apps).collect(),
        }
    }
}

impl DeployConfig {
    /// Reject configurations the pipeline cannot run safely
    pub fn validate(&self) -> ConfigResult<()> {
        if self.build.max_parallel == 0 {
            return Err(ConfigurationError::invalid_value(
                "build.max_parallel",
                "0",
                "at least one concurrent build is required",
            ));
        }
        if self.import.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "import.chunk_size",
                "0",
                "chunks must hold at least one image",
            ));
        }
        if self.cluster.name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "cluster.name",
                "k3d cluster name must not be empty",
            ));
        }
        if self.units.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "units",
                "at least one deployment unit is required",
            ));
        }

        let mut target_names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "targets[].name",
                    format!("target with image {} has no name", target.image),
                ));
            }
            if !target_names.insert(target.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "targets[].name",
                    target.name.clone(),
                    "duplicate build target name",
                ));
            }
        }

        let mut unit_names = HashSet::new();
        for unit in &self.units {
            if !unit_names.insert(unit.name.as_str()) {
                return Err(ConfigurationError::invalid_value(
                    "units[].name",
                    unit.name.clone(),
                    "duplicate unit name",
                ));
            }
            if let Some(target) = &unit.target {
                if !target_names.contains(target.as_str()) {
                    return Err(ConfigurationError::invalid_value(
                        format!("units[{}].target", unit.name),
                        target.clone(),
                        "unit references an unknown build target",
                    ));
                }
            }
        }

        match self.reconcile.sufficiency {
            SufficiencyThreshold::Ratio(ratio) if !(ratio > 0.0 && ratio <= 1.0) => {
                return Err(ConfigurationError::invalid_value(
                    "reconcile.sufficiency.ratio",
                    ratio.to_string(),
                    "ratio must be in (0, 1]",
                ));
            }
            SufficiencyThreshold::Count(count) if count == 0 || count > self.units.len() => {
                return Err(ConfigurationError::invalid_value(
                    "reconcile.sufficiency.count",
                    count.to_string(),
                    format!("count must be between 1 and {}", self.units.len()),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Anchor every relative path in the configuration at `root`
    pub fn resolve_relative_paths(&mut self, root: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        };

        anchor(&mut self.build.log_directory);
        anchor(&mut self.seed.manifest);
        if let Some(manifest) = self.cluster.namespace_manifest.as_mut() {
            anchor(manifest);
        }
        for target in &mut self.targets {
            anchor(&mut target.source_path);
            if let Some(dockerfile) = target.dockerfile.as_mut() {
                anchor(dockerfile);
            }
        }
        for unit in &mut self.units {
            anchor(&mut unit.manifest);
        }
    }

    pub fn infra_units(&self) -> impl Iterator<Item = &UnitConfig> {
        self.units.iter().filter(|u| u.tier == UnitTier::Infra)
    }

    pub fn app_units(&self) -> impl Iterator<Item = &UnitConfig> {
        self.units.iter().filter(|u| u.tier == UnitTier::App)
    }
}
