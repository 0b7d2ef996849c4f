//! # Platform Constants
//!
//! Defaults for every tunable knob and the stock ECI service catalog.

/// Concurrent image builds
pub const DEFAULT_MAX_PARALLEL_BUILDS: usize = 6;

/// Images older than this are rebuilt even without source changes
pub const DEFAULT_IMAGE_MAX_AGE_HOURS: u64 = 24;

/// Images per `k3d image import` call once the needed set is large
pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 5;

/// Needed sets at or below this size are imported in a single call
pub const DEFAULT_IMPORT_SMALL_BATCH: usize = 6;

pub const DEFAULT_INFRA_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_APP_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_REMEDIATION_GRACE_SECONDS: u64 = 20;
pub const DEFAULT_SEED_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;

/// Share of units that must be running after remediation for a degraded success
pub const DEFAULT_SUFFICIENCY_RATIO: f64 = 0.85;

pub const DEFAULT_CLUSTER_NAME: &str = "eci";
pub const DEFAULT_NAMESPACE: &str = "eci";
pub const DEFAULT_CLUSTER_AGENTS: u32 = 2;
pub const DEFAULT_LOAD_BALANCER_PORT: u16 = 8080;
pub const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 120;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";
pub const DEFAULT_SMOKE_RETRIES: u32 = 30;
pub const DEFAULT_SMOKE_RETRY_DELAY_SECONDS: u64 = 2;

/// Binaries the driver shells out to
pub const REQUIRED_BINARIES: [&str; 3] = ["docker", "k3d", "kubectl"];

/// Data-layer units, applied and awaited before everything else
pub const INFRA_UNITS: [&str; 2] = ["postgres", "redis"];

/// Application services, in apply order
pub const APP_SERVICES: [&str; 8] = [
    "customers",
    "products",
    "inventory",
    "orders",
    "payments",
    "shipments",
    "gateway",
    "dashboard",
];

/// Targets whose content cannot be compared by timestamp (bundled CSV data, UI templates)
pub const ALWAYS_REBUILD_TARGETS: [&str; 2] = ["dashboard", "seed"];

pub const SEED_TARGET: &str = "seed";
pub const SEED_JOB_NAME: &str = "eci-seed";

pub const IMAGE_PREFIX: &str = "eci";
pub const IMAGE_TAG: &str = "latest";

/// Environment variable names for the externally configurable knobs
pub mod env_vars {
    pub const ENVIRONMENT: &str = "ECI_ENV";
    pub const CONFIG_DIR: &str = "ECI_CONFIG_DIR";
    pub const PROJECT_ROOT: &str = "ECI_PROJECT_ROOT";
    pub const MAX_PARALLEL_BUILDS: &str = "ECI_MAX_PARALLEL_BUILDS";
    pub const IMAGE_MAX_AGE_HOURS: &str = "ECI_IMAGE_MAX_AGE_HOURS";
    pub const IMPORT_CHUNK_SIZE: &str = "ECI_IMPORT_CHUNK_SIZE";
    pub const IMPORT_SMALL_BATCH: &str = "ECI_IMPORT_SMALL_BATCH";
    pub const INFRA_TIMEOUT_SECONDS: &str = "ECI_INFRA_TIMEOUT_SECONDS";
    pub const APP_TIMEOUT_SECONDS: &str = "ECI_APP_TIMEOUT_SECONDS";
    pub const REMEDIATION_GRACE_SECONDS: &str = "ECI_REMEDIATION_GRACE_SECONDS";
    pub const SEED_TIMEOUT_SECONDS: &str = "ECI_SEED_TIMEOUT_SECONDS";
    pub const CORE_THRESHOLD: &str = "ECI_CORE_THRESHOLD";
    pub const NO_CACHE: &str = "ECI_NO_CACHE";
}
