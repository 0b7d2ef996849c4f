//! Configuration Loader
//!
//! Environment-aware configuration loading. Reads `eci-deploy.yaml`, merges
//! the section named after the active environment over the base document,
//! applies `ECI_*` environment-variable overrides, then validates.

use super::error::{ConfigResult, ConfigurationError};
use super::{DeployConfig, SufficiencyThreshold};
use crate::constants::env_vars;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["eci-deploy.yaml", "eci-deploy.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Keys an environment section replaces instead of merging into
const REPLACED_ON_MERGE: [&str; 1] = ["sufficiency"];

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: DeployConfig,
    environment: String,
    /// `None` when built-in defaults were used
    config_file: Option<PathBuf>,
    project_root: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment,
    /// reading overrides from the process environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, |name| env::var(name).ok())
    }

    /// Load with an explicit override lookup; tests use this to avoid
    /// touching process-wide environment variables
    pub fn load_with_overrides<F>(
        config_dir: Option<PathBuf>,
        environment: &str,
        lookup: F,
    ) -> ConfigResult<Arc<ConfigManager>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit_dir = config_dir.or_else(|| lookup(env_vars::CONFIG_DIR).map(PathBuf::from));

        let (mut config, config_file, config_directory) = match explicit_dir {
            Some(dir) => {
                let file = Self::find_config_file(&dir)?;
                (Self::load_and_merge_config(&file, environment)?, Some(file), dir)
            }
            None => match Self::discover_config_directory() {
                Some(dir) => {
                    let file = Self::find_config_file(&dir)?;
                    (Self::load_and_merge_config(&file, environment)?, Some(file), dir)
                }
                None => {
                    warn!("No eci-deploy.yaml found, using built-in platform defaults");
                    let cwd = env::current_dir()
                        .map_err(|e| ConfigurationError::file_read_error("current_dir", e))?;
                    (DeployConfig::default(), None, cwd)
                }
            },
        };

        Self::apply_env_overrides(&mut config, &lookup)?;
        config.validate()?;

        let project_root = Self::determine_project_root(&config_directory, &lookup);
        config.resolve_relative_paths(&project_root);

        info!(
            environment = %environment,
            config_file = %config_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<defaults>".to_string()),
            project_root = %project_root.display(),
            targets = config.targets.len(),
            units = config.units.len(),
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
            project_root,
        }))
    }

    /// Wrap an in-memory configuration (already validated by the caller)
    pub fn from_config(config: DeployConfig, environment: &str, project_root: PathBuf) -> Self {
        Self {
            config,
            environment: environment.to_string(),
            config_file: None,
            project_root,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Configuration as JSON with sensitive-looking fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        Self::sanitize_json_recursive(&mut value, &["password", "secret", "token"]);
        value
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    /// ECI_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Walk up from the current directory looking for `config/eci-deploy.yaml`
    fn discover_config_directory() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let candidate = current.join("config");
            if CONFIG_FILE_NAMES
                .iter()
                .any(|name| candidate.join(name).is_file())
            {
                debug!("Found config directory: {}", candidate.display());
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    fn determine_project_root<F>(config_directory: &Path, lookup: &F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(env_vars::PROJECT_ROOT) {
            let root = PathBuf::from(root);
            if root.exists() {
                debug!("Using {}: {}", env_vars::PROJECT_ROOT, root.display());
                return root;
            }
        }

        // config directory is conventionally <project_root>/config
        if config_directory.file_name().and_then(|n| n.to_str()) == Some("config") {
            if let Some(parent) = config_directory.parent() {
                return parent.to_path_buf();
            }
        }

        config_directory.to_path_buf()
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched = Vec::new();
        for name in CONFIG_FILE_NAMES {
            let path = config_directory.join(name);
            if path.is_file() {
                debug!("Found configuration file: {}", path.display());
                return Ok(path);
            }
            searched.push(path);
        }
        Err(ConfigurationError::config_file_not_found(searched))
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file exceeds 1MB",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(config_file: &Path, environment: &str) -> ConfigResult<DeployConfig> {
        let content = Self::read_config_file_safely(config_file)?;

        let mut yaml: YamlValue = serde_yaml::from_str(&content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        // an empty file parses to null
        if yaml.is_null() {
            yaml = YamlValue::Mapping(Default::default());
        }

        if let Some(overrides) = yaml.get(environment).cloned() {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml, overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(section);
            }
            map.remove(environment);
        }

        serde_yaml::from_value(yaml).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Deep-merge `override_value` into `base`; mappings merge, everything else replaces.
    ///
    /// Keys in [`REPLACED_ON_MERGE`] hold one-of maps and are replaced whole.
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    let replaced = key
                        .as_str()
                        .is_some_and(|k| REPLACED_ON_MERGE.contains(&k));
                    if replaced {
                        base_map.insert(key, value);
                    } else if let Some(existing) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, value) => *base_ref = value,
        }
    }

    /// Apply `ECI_*` overrides for the externally tunable knobs
    pub fn apply_env_overrides<F>(config: &mut DeployConfig, lookup: &F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(
            variable: &str,
            value: &str,
        ) -> ConfigResult<T>
        where
            T::Err: std::fmt::Display,
        {
            value.trim().parse::<T>().map_err(|e| {
                ConfigurationError::invalid_env_override(variable, value, e.to_string())
            })
        }

        if let Some(v) = lookup(env_vars::MAX_PARALLEL_BUILDS) {
            config.build.max_parallel = parse(env_vars::MAX_PARALLEL_BUILDS, &v)?;
        }
        if let Some(v) = lookup(env_vars::IMAGE_MAX_AGE_HOURS) {
            config.build.max_age_hours = parse(env_vars::IMAGE_MAX_AGE_HOURS, &v)?;
        }
        if let Some(v) = lookup(env_vars::IMPORT_CHUNK_SIZE) {
            config.import.chunk_size = parse(env_vars::IMPORT_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = lookup(env_vars::IMPORT_SMALL_BATCH) {
            config.import.small_batch_threshold = parse(env_vars::IMPORT_SMALL_BATCH, &v)?;
        }
        if let Some(v) = lookup(env_vars::INFRA_TIMEOUT_SECONDS) {
            config.reconcile.infra_timeout_seconds = parse(env_vars::INFRA_TIMEOUT_SECONDS, &v)?;
        }
        if let Some(v) = lookup(env_vars::APP_TIMEOUT_SECONDS) {
            config.reconcile.app_timeout_seconds = parse(env_vars::APP_TIMEOUT_SECONDS, &v)?;
        }
        if let Some(v) = lookup(env_vars::REMEDIATION_GRACE_SECONDS) {
            config.reconcile.remediation_grace_seconds =
                parse(env_vars::REMEDIATION_GRACE_SECONDS, &v)?;
        }
        if let Some(v) = lookup(env_vars::SEED_TIMEOUT_SECONDS) {
            config.seed.timeout_seconds = parse(env_vars::SEED_TIMEOUT_SECONDS, &v)?;
        }
        if let Some(v) = lookup(env_vars::CORE_THRESHOLD) {
            config.reconcile.sufficiency =
                parse::<SufficiencyThreshold>(env_vars::CORE_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(env_vars::NO_CACHE) {
            config.build.no_cache = match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigurationError::invalid_env_override(
                        env_vars::NO_CACHE,
                        other,
                        "expected true/false",
                    ))
                }
            };
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join("eci-deploy.yaml"), content).unwrap();
    }

    #[test]
    fn test_environment_section_overrides_base() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        write_config(
            &config_dir,
            r#"
build:
  max_parallel: 4
reconcile:
  app_timeout_seconds: 90
production:
  build:
    max_parallel: 12
"#,
        );

        let dev = ConfigManager::load_with_overrides(Some(config_dir.clone()), "development", no_env)
            .unwrap();
        assert_eq!(dev.config().build.max_parallel, 4);
        assert_eq!(dev.config().reconcile.app_timeout_seconds, 90);

        let prod =
            ConfigManager::load_with_overrides(Some(config_dir.clone()), "production", no_env)
                .unwrap();
        assert_eq!(prod.config().build.max_parallel, 12);
        assert_eq!(prod.config().reconcile.app_timeout_seconds, 90);
        assert_eq!(prod.environment(), "production");
        assert_eq!(prod.project_root(), tmp.path());
    }

    #[test]
    fn test_environment_section_swaps_sufficiency_kind() {
        let tmp = TempDir::new().unwrap();
        write_config(
            tmp.path(),
            r#"
reconcile:
  sufficiency:
    ratio: 0.85
production:
  reconcile:
    sufficiency:
      count: 7
"#,
        );

        let prod =
            ConfigManager::load_with_overrides(Some(tmp.path().to_path_buf()), "production", no_env)
                .unwrap();
        assert_eq!(prod.config().reconcile.sufficiency, SufficiencyThreshold::Count(7));

        let dev =
            ConfigManager::load_with_overrides(Some(tmp.path().to_path_buf()), "development", no_env)
                .unwrap();
        assert_eq!(dev.config().reconcile.sufficiency, SufficiencyThreshold::Ratio(0.85));
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let tmp = TempDir::new().unwrap();
        write_config(tmp.path(), "build:\n  max_parallel: 4\n");

        let vars: HashMap<&str, &str> = HashMap::from([
            (env_vars::MAX_PARALLEL_BUILDS, "2"),
            (env_vars::CORE_THRESHOLD, "7"),
            (env_vars::NO_CACHE, "true"),
            (env_vars::INFRA_TIMEOUT_SECONDS, "120"),
        ]);
        let manager = ConfigManager::load_with_overrides(
            Some(tmp.path().to_path_buf()),
            "test",
            |name| vars.get(name).map(|v| v.to_string()),
        )
        .unwrap();

        let config = manager.config();
        assert_eq!(config.build.max_parallel, 2);
        assert!(config.build.no_cache);
        assert_eq!(config.reconcile.infra_timeout_seconds, 120);
        assert_eq!(config.reconcile.sufficiency, SufficiencyThreshold::Count(7));
    }

    #[test]
    fn test_invalid_env_override_is_rejected() {
        let tmp = TempDir::new().unwrap();
        write_config(tmp.path(), "");

        let err = ConfigManager::load_with_overrides(
            Some(tmp.path().to_path_buf()),
            "test",
            |name| (name == env_vars::IMPORT_CHUNK_SIZE).then(|| "five".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidEnvOverride { .. }));
    }

    #[test]
    fn test_missing_file_in_explicit_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = ConfigManager::load_with_overrides(Some(tmp.path().to_path_buf()), "test", no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_relative_paths_are_anchored_at_project_root() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        write_config(&config_dir, "");

        let manager =
            ConfigManager::load_with_overrides(Some(config_dir), "test", no_env).unwrap();
        let customers = &manager.config().targets[0];
        assert_eq!(customers.source_path, tmp.path().join("services/customers"));
    }

    #[test]
    fn test_debug_config_masks_sensitive_fields() {
        let manager = ConfigManager::from_config(
            DeployConfig::default(),
            "test",
            PathBuf::from("/tmp"),
        );
        let mut value = manager.debug_config();
        value["smoke"]["password"] = serde_json::json!("hunter2");
        ConfigManager::sanitize_json_recursive(&mut value, &["password"]);
        assert_eq!(value["smoke"]["password"], "[MASKED]");
        assert_eq!(value["build"]["max_parallel"], 6);
    }
}
