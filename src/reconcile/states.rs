use serde::{Deserialize, Serialize};
use std::fmt;

/// Reconciliation run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    /// Submitting manifests and restarting refreshed units
    Applying,
    /// Bounded wait for data-layer units
    WaitingInfra,
    /// Bounded wait for every unit
    WaitingApps,
    /// Restarting unhealthy units after the app wait timed out
    Remediating,
    /// Healthy or degraded success
    Done,
    Failed,
}

impl ReconcileState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the run may move from `self` to `next`
    pub fn can_transition_to(&self, next: ReconcileState) -> bool {
        use ReconcileState::*;
        matches!(
            (*self, next),
            (Applying, WaitingInfra)
                | (Applying, Failed)
                | (WaitingInfra, WaitingApps)
                | (WaitingInfra, Failed)
                | (WaitingApps, Done)
                | (WaitingApps, Remediating)
                | (WaitingApps, Failed)
                | (Remediating, Done)
                | (Remediating, Failed)
        )
    }
}

impl Default for ReconcileState {
    fn default() -> Self {
        Self::Applying
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applying => write!(f, "applying"),
            Self::WaitingInfra => write!(f, "waiting_infra"),
            Self::WaitingApps => write!(f, "waiting_apps"),
            Self::Remediating => write!(f, "remediating"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ReconcileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applying" => Ok(Self::Applying),
            "waiting_infra" => Ok(Self::WaitingInfra),
            "waiting_apps" => Ok(Self::WaitingApps),
            "remediating" => Ok(Self::Remediating),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid reconcile state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ReconcileState::Done.is_terminal());
        assert!(ReconcileState::Failed.is_terminal());
        assert!(!ReconcileState::Remediating.is_terminal());
        assert!(!ReconcileState::Applying.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use ReconcileState::*;
        assert!(Applying.can_transition_to(WaitingInfra));
        assert!(WaitingInfra.can_transition_to(Failed));
        assert!(WaitingApps.can_transition_to(Remediating));
        assert!(Remediating.can_transition_to(Done));

        // no going back to an earlier wait
        assert!(!WaitingApps.can_transition_to(WaitingInfra));
        assert!(!Applying.can_transition_to(WaitingApps));
        assert!(!Done.can_transition_to(Applying));
    }

    #[test]
    fn test_state_string_conversion() {
        for state in [
            ReconcileState::Applying,
            ReconcileState::WaitingInfra,
            ReconcileState::WaitingApps,
            ReconcileState::Remediating,
            ReconcileState::Done,
            ReconcileState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<ReconcileState>().unwrap(), state);
        }
        assert!("bogus".parse::<ReconcileState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&ReconcileState::WaitingInfra).unwrap();
        assert_eq!(json, "\"waiting_infra\"");
    }
}
