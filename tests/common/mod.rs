//! Shared fixtures for the integration suites

#![allow(dead_code)]

pub mod strategies;

use chrono::{DateTime, TimeZone, Utc};
use eci_deploy::clock::FixedClock;
use eci_deploy::config::{DeployConfig, TargetConfig, UnitConfig, UnitTier};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

/// Fixed "now" for every pipeline test
pub fn deploy_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn fixed_clock() -> FixedClock {
    FixedClock::new(deploy_time())
}

/// Source tree for one target under `root`, with a single file stamped `mtime`
pub fn write_source(root: &Path, name: &str, mtime: DateTime<Utc>) -> PathBuf {
    let dir = root.join("services").join(name);
    fs::create_dir_all(&dir).unwrap();
    let file_path = dir.join("main.py");
    fs::write(&file_path, format!("# {name}\n")).unwrap();
    touch(&file_path, mtime);
    dir
}

pub fn touch(path: &Path, mtime: DateTime<Utc>) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(mtime)).unwrap();
}

pub fn image_ref(name: &str) -> String {
    format!("eci/{name}:latest")
}

pub fn unit(name: &str, tier: UnitTier, target: Option<&str>) -> UnitConfig {
    UnitConfig {
        name: name.to_string(),
        tier,
        manifest: PathBuf::from("k8s").join(format!("{name}.yaml")),
        replicas: 1,
        target: target.map(str::to_string),
    }
}

/// Configuration with one infra unit `postgres` plus one app unit per target,
/// seeding and smoke checks off
pub fn workspace_config(workspace: &TempDir, targets: &[&str]) -> DeployConfig {
    let mut config = DeployConfig::default();
    config.seed.enabled = false;
    config.smoke.enabled = false;
    config.build.log_directory = workspace.path().join("log/builds");
    config.targets = targets
        .iter()
        .map(|name| TargetConfig {
            name: (*name).to_string(),
            source_path: workspace.path().join("services").join(name),
            image: image_ref(name),
            force_rebuild: false,
            dockerfile: None,
        })
        .collect();
    config.units = std::iter::once(unit("postgres", UnitTier::Infra, None))
        .chain(targets.iter().map(|name| unit(name, UnitTier::App, Some(*name))))
        .collect();
    config
}

/// Unit-only configuration for reconciler suites
pub fn units_config(infra: &[&str], apps: &[&str]) -> DeployConfig {
    let mut config = DeployConfig::default();
    config.seed.enabled = false;
    config.smoke.enabled = false;
    config.targets = Vec::new();
    config.units = infra
        .iter()
        .map(|name| unit(name, UnitTier::Infra, None))
        .chain(apps.iter().map(|name| unit(name, UnitTier::App, None)))
        .collect();
    config
}
