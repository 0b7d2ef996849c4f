use crate::config::{ConfigurationError, TargetConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One deployable image's build definition. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildTarget {
    pub name: String,
    /// Directory whose contents determine staleness; also the build context
    pub source_path: PathBuf,
    /// Image reference, e.g. `eci/orders:latest`
    pub artifact_ref: String,
    pub force_rebuild: bool,
    pub dockerfile: Option<PathBuf>,
}

impl BuildTarget {
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        artifact_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            artifact_ref: artifact_ref.into(),
            force_rebuild: false,
            dockerfile: None,
        }
    }

    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Dockerfile to build with; `<source_path>/Dockerfile` unless overridden
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.source_path.join("Dockerfile"))
    }

    pub fn source_exists(&self) -> bool {
        Path::new(&self.source_path).exists()
    }

    /// Build the run's target set from configuration, rejecting duplicate names
    pub fn from_configs(configs: &[TargetConfig]) -> Result<Vec<BuildTarget>, ConfigurationError> {
        let mut seen = HashSet::new();
        configs
            .iter()
            .map(|config| {
                if !seen.insert(config.name.as_str()) {
                    return Err(ConfigurationError::invalid_value(
                        "targets[].name",
                        config.name.clone(),
                        "duplicate build target name",
                    ));
                }
                Ok(BuildTarget::from(config))
            })
            .collect()
    }
}

impl From<&TargetConfig> for BuildTarget {
    fn from(config: &TargetConfig) -> Self {
        Self {
            name: config.name.clone(),
            source_path: config.source_path.clone(),
            artifact_ref: config.image.clone(),
            force_rebuild: config.force_rebuild,
            dockerfile: config.dockerfile.clone(),
        }
    }
}
