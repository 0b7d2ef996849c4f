//! # Deployment Error Types
//!
//! Structured error taxonomy for the deployment driver using thiserror.
//! Every fatal path carries the names of the failing targets or units and,
//! where available, the captured diagnostics.

use crate::config::ConfigurationError;
use crate::process::ProcessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of trailing log lines included in operator-facing failure reports
pub const LOG_TAIL_LINES: usize = 40;

/// A build target that failed, together with its captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBuild {
    pub target: String,
    pub log: String,
}

impl FailedBuild {
    /// Last `LOG_TAIL_LINES` lines of the captured output
    pub fn log_tail(&self) -> String {
        tail_lines(&self.log, LOG_TAIL_LINES)
    }
}

/// Snapshot of every unit status taken when a reconciliation step gives up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticDump {
    pub lines: Vec<String>,
}

impl fmt::Display for DiagnosticDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Missing prerequisites: {}", missing.join(", "))]
    Prerequisite { missing: Vec<String> },

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Build failed for: {}", failed_names(.failed))]
    BuildFailure { failed: Vec<FailedBuild> },

    #[error(
        "Image import failed on chunk {chunk}/{chunks} ({}) after {imported} image(s) imported: {message}",
        members.join(", ")
    )]
    ImportFailure {
        chunk: usize,
        chunks: usize,
        members: Vec<String>,
        imported: usize,
        message: String,
    },

    #[error("Infrastructure units not ready after {timeout_seconds}s: {}", pending.join(", "))]
    InfraTimeout {
        pending: Vec<String>,
        timeout_seconds: u64,
        diagnostics: DiagnosticDump,
    },

    #[error(
        "Remediation insufficient: {running}/{total} units running, {required} required (not running: {})",
        not_running.join(", ")
    )]
    RemediationInsufficient {
        running: usize,
        required: usize,
        total: usize,
        not_running: Vec<String>,
        diagnostics: DiagnosticDump,
    },

    #[error("Cluster operation failed: {operation}: {message}")]
    Cluster { operation: String, message: String },

    #[error("Artifact store error for {artifact}: {message}")]
    Artifact { artifact: String, message: String },

    #[error("Smoke check failed: {check}: {message}")]
    Smoke { check: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn failed_names(failed: &[FailedBuild]) -> String {
    failed
        .iter()
        .map(|f| f.target.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl DeployError {
    pub fn cluster(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cluster {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn artifact(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Artifact {
            artifact: artifact.into(),
            message: message.into(),
        }
    }

    pub fn smoke(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Smoke {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error. Every error reaching the driver is fatal.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Multi-line operator report: the error line followed by whatever
    /// captured logs or status dumps the error carries.
    pub fn report(&self) -> String {
        let mut out = format!("{self}\n");
        match self {
            Self::BuildFailure { failed } => {
                for build in failed {
                    out.push_str(&format!(
                        "--- build log: {} (last {} lines) ---\n{}\n",
                        build.target,
                        LOG_TAIL_LINES,
                        build.log_tail()
                    ));
                }
            }
            Self::InfraTimeout { diagnostics, .. }
            | Self::RemediationInsufficient { diagnostics, .. } => {
                out.push_str("Unit status at failure:\n");
                out.push_str(&diagnostics.to_string());
            }
            _ => {}
        }
        out
    }
}

/// Keep the last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines_keeps_last_lines() {
        let text = (1..=50).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "line 48\nline 49\nline 50");
        assert_eq!(tail_lines("short", 10), "short");
    }

    #[test]
    fn test_build_failure_report_names_every_target() {
        let err = DeployError::BuildFailure {
            failed: vec![
                FailedBuild {
                    target: "orders".to_string(),
                    log: "step 1\nERROR: pip install failed".to_string(),
                },
                FailedBuild {
                    target: "payments".to_string(),
                    log: "COPY failed".to_string(),
                },
            ],
        };

        assert_eq!(err.to_string(), "Build failed for: orders, payments");
        let report = err.report();
        assert!(report.contains("build log: orders"));
        assert!(report.contains("ERROR: pip install failed"));
        assert!(report.contains("COPY failed"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_infra_timeout_report_includes_dump() {
        let err = DeployError::InfraTimeout {
            pending: vec!["postgres".to_string()],
            timeout_seconds: 60,
            diagnostics: DiagnosticDump {
                lines: vec!["postgres pending 0/1 restarts=3".to_string()],
            },
        };
        let report = err.report();
        assert!(report.starts_with("Infrastructure units not ready after 60s: postgres"));
        assert!(report.contains("postgres pending 0/1 restarts=3"));
    }
}
