//! Fuzz target for label selector matching and policy parsing.
//!
//! Neither should panic on arbitrary input.

#![no_main]

use crd_replicator::labels::LabelSelector;
use crd_replicator::registry::OwnershipPolicy;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

fuzz_target!(|data: (Vec<(String, String)>, Vec<(String, Option<String>)>, &str)| {
    let (labels, requirements, policy) = data;
    let labels: BTreeMap<String, String> = labels.into_iter().collect();

    let mut selector = LabelSelector::everything();
    for (key, value) in requirements {
        selector = match value {
            Some(value) => selector.equals(key, value),
            None => selector.exists(key),
        };
    }

    let _ = selector.matches(&labels);
    let _ = policy.parse::<OwnershipPolicy>();
});
