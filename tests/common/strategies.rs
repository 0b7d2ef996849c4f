use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

/// Epoch seconds within a few years of 2025
pub fn epoch_seconds_strategy() -> impl Strategy<Value = i64> {
    1_700_000_000i64..1_800_000_000i64
}

pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    epoch_seconds_strategy().prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

/// Image references like `eci/orders-3:latest`
pub fn artifact_ref_strategy() -> impl Strategy<Value = String> {
    "[a-z]{3,10}(-[0-9]{1,2})?".prop_map(|name| format!("eci/{name}:latest"))
}

/// Distinct image references, possibly empty
pub fn needed_set_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(artifact_ref_strategy(), 0..=max)
        .prop_map(|set| set.into_iter().collect())
}
