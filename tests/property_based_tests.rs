mod common;

use common::strategies::*;
use eci_deploy::build::freshness::classify;
use eci_deploy::build::StalenessDecision;
use eci_deploy::cluster::plan_batches;
use eci_deploy::config::SufficiencyThreshold;
use eci_deploy::reconcile::ReconcileState;
use proptest::prelude::*;

const ALL_STATES: [ReconcileState; 6] = [
    ReconcileState::Applying,
    ReconcileState::WaitingInfra,
    ReconcileState::WaitingApps,
    ReconcileState::Remediating,
    ReconcileState::Done,
    ReconcileState::Failed,
];

proptest! {
    /// Property: a source file newer than the image always forces a rebuild
    #[test]
    fn newer_source_is_always_stale(
        created in epoch_seconds_strategy(),
        lead in 1i64..100_000,
        age in 0i64..200_000,
        max_age_hours in 0u64..100,
    ) {
        let (decision, _) = classify(created + lead, created, created + age, max_age_hours);
        prop_assert_eq!(decision, StalenessDecision::SourceNewer);
    }

    /// Property: with sources no newer than the image, only age decides
    #[test]
    fn age_ceiling_decides_when_sources_unchanged(
        created in epoch_seconds_strategy(),
        lag in 0i64..100_000,
        age in 0i64..200_000,
        max_age_hours in 0u64..100,
    ) {
        let (decision, _) = classify(created - lag, created, created + age, max_age_hours);
        let expected = if age > (max_age_hours as i64) * 3600 {
            StalenessDecision::StaleByAge
        } else {
            StalenessDecision::UpToDate
        };
        prop_assert_eq!(decision, expected);
    }

    /// Property: batching never drops, duplicates or reorders images
    #[test]
    fn batches_preserve_the_needed_set(
        needed in needed_set_strategy(40),
        chunk_size in 1usize..10,
        threshold in 0usize..10,
    ) {
        let batches = plan_batches(&needed, chunk_size, threshold);
        let flattened: Vec<String> = batches.iter().flat_map(|b| b.members.clone()).collect();
        prop_assert_eq!(&flattened, &needed);
        prop_assert!(batches.iter().all(|b| !b.is_empty()));
    }

    /// Property: small sets take one call, large sets take ceil(n / chunk) calls
    #[test]
    fn batch_count_follows_threshold(
        needed in needed_set_strategy(40),
        chunk_size in 1usize..10,
        threshold in 0usize..10,
    ) {
        let batches = plan_batches(&needed, chunk_size, threshold);
        let expected = if needed.is_empty() {
            0
        } else if needed.len() <= threshold {
            1
        } else {
            needed.len().div_ceil(chunk_size)
        };
        prop_assert_eq!(batches.len(), expected);
        if needed.len() > threshold {
            prop_assert!(batches.iter().all(|b| b.len() <= chunk_size));
        }
    }

    /// Property: a ratio threshold never asks for more units than exist
    #[test]
    fn ratio_threshold_is_bounded(ratio in 0.01f64..=1.0, total in 1usize..200) {
        let required = SufficiencyThreshold::Ratio(ratio).required(total);
        prop_assert!(required <= total);
        prop_assert!(required as f64 + 1e-6 >= ratio * total as f64);
    }
}

#[test]
fn terminal_states_have_no_way_out() {
    for state in ALL_STATES.iter().filter(|s| s.is_terminal()) {
        for next in ALL_STATES {
            assert!(
                !state.can_transition_to(next),
                "{state} should not transition to {next}"
            );
        }
    }
}

#[test]
fn every_non_terminal_state_can_fail() {
    for state in ALL_STATES.iter().filter(|s| !s.is_terminal()) {
        assert!(state.can_transition_to(ReconcileState::Failed), "{state} cannot fail");
    }
}
