//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and files
//! so a failed deploy can be reconstructed after the terminal scrolls away.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::constants::env_vars;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize structured logging with environment-specific configuration.
///
/// `verbosity` raises the console level (`-v` debug, `-vv` trace). `RUST_LOG`
/// always wins when set.
///
/// Returns the file writer's guard on the first call. Buffered lines reach
/// the log file only once it is dropped, so hold it until the process exits.
pub fn init_structured_logging(verbosity: u8) -> Option<WorkerGuard> {
    let mut file_guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment, verbosity);

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_dir = PathBuf::from("log");

        // File output is best effort; a read-only checkout still gets console logs
        let file_layer = match json_file_layer(&log_dir, &log_filename, &log_level) {
            Ok((layer, guard)) => {
                file_guard = Some(guard);
                Some(layer)
            }
            Err(_) => None,
        };

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(&log_level));

        let subscriber = tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_dir.join(&log_filename).display(),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
    file_guard
}

/// JSON lines written to `log_dir/file_name` through a non-blocking writer
fn json_file_layer(
    log_dir: &Path,
    file_name: &str,
    log_level: &str,
) -> std::io::Result<(BoxedLayer, WorkerGuard)> {
    fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .json()
        .with_filter(build_filter(log_level))
        .boxed();
    Ok((layer, guard))
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env_vars::ENVIRONMENT)
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment and requested verbosity
fn get_log_level(environment: &str, verbosity: u8) -> String {
    match (environment, verbosity) {
        (_, v) if v >= 2 => "trace".to_string(),
        (_, 1) => "debug".to_string(),
        ("production", _) => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for build operations
pub fn log_build_operation(
    operation: &str,
    target: &str,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        target_name = %target,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔨 BUILD_OPERATION"
    );
}

/// Log structured data for image import operations
pub fn log_import_operation(
    operation: &str,
    chunk: usize,
    chunks: usize,
    imported: usize,
    total: usize,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        chunk = chunk,
        chunks = chunks,
        imported = imported,
        total = total,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 IMPORT_OPERATION"
    );
}

/// Log structured data for deployment unit operations
pub fn log_unit_operation(operation: &str, unit: &str, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        unit = %unit,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "☸️ UNIT_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dropping_guard_flushes_the_json_file() {
        let dir = TempDir::new().unwrap();
        let (layer, guard) = json_file_layer(dir.path(), "deploy.log", "info").unwrap();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            log_error("cli", "deploy", "infrastructure units not ready", None);
        });
        drop(guard);

        let content = fs::read_to_string(dir.path().join("deploy.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.lines().last().unwrap()).unwrap();
        assert_eq!(line["level"], "ERROR");
        assert_eq!(line["fields"]["error"], "infrastructure units not ready");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test", 0), "debug");
        assert_eq!(get_log_level("development", 0), "debug");
        assert_eq!(get_log_level("production", 0), "info");
        assert_eq!(get_log_level("production", 1), "debug");
        assert_eq!(get_log_level("unknown", 0), "debug");
        assert_eq!(get_log_level("production", 3), "trace");
    }
}
