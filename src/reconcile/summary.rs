use super::states::ReconcileState;
use crate::cluster::{UnitPhase, UnitStatus};
use crate::error::DiagnosticDump;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Every unit became ready within the app wait
    Healthy,
    /// Remediation left enough units running to proceed
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SeedOutcome {
    Completed,
    TimedOut { timeout_seconds: u64 },
    Failed { message: String },
    Skipped,
}

/// Non-fatal conditions surfaced alongside a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReconcileWarning {
    AppReadinessTimeout {
        not_ready: Vec<String>,
        timeout_seconds: u64,
    },
    DegradedSuccess {
        running: usize,
        required: usize,
        total: usize,
        not_running: Vec<String>,
    },
    SeedTimeout {
        job: String,
        timeout_seconds: u64,
    },
    SeedFailed {
        job: String,
        message: String,
    },
    RestartFailed {
        unit: String,
        message: String,
    },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppReadinessTimeout {
                not_ready,
                timeout_seconds,
            } => write!(
                f,
                "units not ready after {timeout_seconds}s: {}",
                not_ready.join(", ")
            ),
            Self::DegradedSuccess {
                running,
                required,
                total,
                not_running,
            } => write!(
                f,
                "degraded: {running}/{total} units running ({required} required); not running: {}",
                not_running.join(", ")
            ),
            Self::SeedTimeout {
                job,
                timeout_seconds,
            } => write!(f, "seed job {job} did not complete within {timeout_seconds}s"),
            Self::SeedFailed { job, message } => write!(f, "seed job {job} failed: {message}"),
            Self::RestartFailed { unit, message } => {
                write!(f, "restart of {unit} failed: {message}")
            }
        }
    }
}

/// Result of a reconciliation run that reached `Done`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub state: ReconcileState,
    pub outcome: ReconcileOutcome,
    /// Last observed status of every unit
    pub units: Vec<UnitStatus>,
    /// Units restarted during remediation
    pub remediated: Vec<String>,
    pub seed: SeedOutcome,
    pub warnings: Vec<ReconcileWarning>,
    pub elapsed_ms: u64,
}

impl ReconcileSummary {
    pub fn is_degraded(&self) -> bool {
        self.outcome == ReconcileOutcome::Degraded
    }

    pub fn running_count(&self) -> usize {
        running_count(&self.units)
    }
}

pub fn running_count(statuses: &[UnitStatus]) -> usize {
    statuses
        .iter()
        .filter(|s| s.phase == UnitPhase::Running)
        .count()
}

/// One line per unit, for failure reports
pub fn diagnostic_dump(statuses: &[UnitStatus]) -> DiagnosticDump {
    DiagnosticDump {
        lines: statuses.iter().map(UnitStatus::summary_line).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_has_one_line_per_unit() {
        let statuses = vec![
            UnitStatus::new("postgres", UnitPhase::Running).with_replicas(1, 1),
            UnitStatus::new("redis", UnitPhase::Pending).with_restarts(2),
        ];
        let dump = diagnostic_dump(&statuses);
        assert_eq!(dump.lines.len(), 2);
        assert!(dump.lines[1].contains("redis"));
        assert!(dump.lines[1].contains("restarts=2"));
        assert_eq!(running_count(&statuses), 1);
    }

    #[test]
    fn test_warning_display() {
        let warning = ReconcileWarning::SeedTimeout {
            job: "eci-seed".to_string(),
            timeout_seconds: 30,
        };
        assert_eq!(
            warning.to_string(),
            "seed job eci-seed did not complete within 30s"
        );
    }
}
