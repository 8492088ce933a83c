//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use crd_replicator::config::QueueConfig;
use crd_replicator::labels::{
    is_managed_mirror, labels_for_remote_creation, remote_copy, replicated_from,
    replication_requested_for, strip_ownership_hint, LabelSelector, FINALIZER, LOCAL_OWNERSHIP_HINT,
    REPLICATION_DESTINATION, REPLICATION_ORIGIN, REPLICATION_REQUESTED, REPLICATION_STATUS,
};
use crd_replicator::queue::WorkQueue;
use crd_replicator::record::{Record, Section};
use crd_replicator::resilience::{BackoffConfig, RateLimitConfig};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

fn label_key() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}",
        "[a-z]{1,6}\\.io/[a-z]{1,8}",
        Just(REPLICATION_REQUESTED.to_string()),
        Just(REPLICATION_DESTINATION.to_string()),
        Just(LOCAL_OWNERSHIP_HINT.to_string()),
    ]
}

fn label_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(label_key(), "[a-z0-9-]{0,10}", 0..8)
}

// =============================================================================
// Label Selector Properties
// =============================================================================

proptest! {
    /// The empty selector matches every label set
    #[test]
    fn empty_selector_matches_everything(labels in label_map()) {
        prop_assert!(LabelSelector::everything().matches(&labels));
    }

    /// A conjunction matches iff each requirement matches on its own
    #[test]
    fn selector_is_conjunction(
        labels in label_map(),
        key1 in label_key(),
        value1 in "[a-z0-9-]{0,4}",
        key2 in label_key(),
    ) {
        let eq = LabelSelector::everything().equals(key1.clone(), value1.clone());
        let ex = LabelSelector::everything().exists(key2.clone());
        let both = LabelSelector::everything().equals(key1, value1).exists(key2);

        prop_assert_eq!(both.matches(&labels), eq.matches(&labels) && ex.matches(&labels));
    }

    /// A record requesting replication to one cluster never matches another's selector
    #[test]
    fn requested_for_distinguishes_destinations(
        labels in label_map(),
        dest in "[a-z]{1,6}",
        other in "[a-z]{1,6}",
    ) {
        prop_assume!(dest != other);
        let mut labels = labels;
        labels.insert(REPLICATION_REQUESTED.to_string(), "true".to_string());
        labels.insert(REPLICATION_DESTINATION.to_string(), dest.clone());

        prop_assert!(replication_requested_for(&dest).matches(&labels));
        prop_assert!(!replication_requested_for(&other).matches(&labels));
    }
}

// =============================================================================
// Mirror Derivation Properties
// =============================================================================

proptest! {
    /// Mirror labels never carry local-only keys and always carry our origin
    #[test]
    fn mirror_labels_are_sanitized(labels in label_map(), origin in "[a-z]{1,8}") {
        let mirrored = labels_for_remote_creation(&labels, &origin);

        prop_assert!(!mirrored.contains_key(REPLICATION_REQUESTED));
        prop_assert!(!mirrored.contains_key(REPLICATION_DESTINATION));
        prop_assert!(!mirrored.contains_key(LOCAL_OWNERSHIP_HINT));
        prop_assert_eq!(mirrored.get(REPLICATION_ORIGIN), Some(&origin));
        prop_assert_eq!(mirrored.get(REPLICATION_STATUS).map(String::as_str), Some("true"));
        prop_assert!(replicated_from(&origin).matches(&mirrored));

        // Everything else passes through unchanged.
        for (key, value) in &labels {
            if key != REPLICATION_REQUESTED
                && key != REPLICATION_DESTINATION
                && key != LOCAL_OWNERSHIP_HINT
                && key != REPLICATION_ORIGIN
                && key != REPLICATION_STATUS
            {
                prop_assert_eq!(mirrored.get(key), Some(value));
            }
        }
    }

    /// A fresh mirror copies only the spec and no server-managed metadata
    #[test]
    fn remote_copy_carries_spec_only(
        labels in label_map(),
        size in 0u32..1000,
        phase in "[A-Za-z]{1,10}",
        namespace in "[a-z]{1,8}",
    ) {
        let mut local = Record::new("local-ns", "rec")
            .with_spec(json!({"size": size}))
            .with_status(json!({"phase": phase}));
        local.metadata.labels = labels;
        local.metadata.finalizers.push(FINALIZER.to_string());
        local.metadata.resource_version = Some("7".to_string());
        local.metadata.uid = Some("uid-7".to_string());
        local
            .metadata
            .annotations
            .insert(LOCAL_OWNERSHIP_HINT.to_string(), "true".to_string());

        let mirror = remote_copy(&local, "cluster-a", &namespace);

        prop_assert_eq!(mirror.namespace(), namespace.as_str());
        prop_assert_eq!(mirror.name(), "rec");
        prop_assert!(mirror.section_eq(&local, Section::Spec));
        prop_assert!(mirror.section(Section::Status).is_none());
        prop_assert!(mirror.metadata.finalizers.is_empty());
        prop_assert!(mirror.metadata.resource_version.is_none());
        prop_assert!(mirror.metadata.uid.is_none());
        prop_assert!(!mirror.metadata.annotations.contains_key(LOCAL_OWNERSHIP_HINT));
        prop_assert!(is_managed_mirror(&mirror, "cluster-a"));
        prop_assert!(!is_managed_mirror(&mirror, "cluster-z"));
    }

    /// Stripping the ownership hint is idempotent
    #[test]
    fn strip_ownership_hint_idempotent(labels in label_map()) {
        let mut record = Record::new("ns", "rec");
        record.metadata.labels = labels;

        strip_ownership_hint(&mut record.metadata);
        let once = record.clone();
        prop_assert!(!strip_ownership_hint(&mut record.metadata));
        prop_assert_eq!(record, once);
    }
}

// =============================================================================
// Backoff Properties
// =============================================================================

proptest! {
    /// Delays never decrease and never exceed the ceiling
    #[test]
    fn backoff_monotonic_and_capped(
        initial_ms in 1u64..1_000,
        max_ms in 1_000u64..600_000,
        factor in 1.0f64..4.0,
    ) {
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: factor,
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..100u32 {
            let delay = backoff.delay_for_attempt(attempt);
            prop_assert!(delay >= previous, "attempt {} went backwards", attempt);
            prop_assert!(delay <= backoff.max_delay);
            previous = delay;
        }
        prop_assert!(backoff.delay_for_attempt(u32::MAX) <= backoff.max_delay);
    }

    /// Queue config always yields a usable schedule
    #[test]
    fn queue_config_backoff_factor_sanitized(factor in prop::num::f64::ANY) {
        let config = QueueConfig { backoff_factor: factor, ..Default::default() };
        let backoff = config.backoff();
        prop_assert!(backoff.backoff_factor.is_finite());
        prop_assert!(backoff.backoff_factor >= 1.0);
    }
}

// =============================================================================
// Work Queue Properties
// =============================================================================

proptest! {
    /// Pending keys are coalesced: the queue never holds a key twice
    #[test]
    fn queue_coalesces_duplicates(keys in prop::collection::vec(0u8..16, 0..64)) {
        let queue: WorkQueue<u8> = WorkQueue::new(
            BackoffConfig::testing(),
            RateLimitConfig { burst_size: 100, refill_rate: 10_000 },
        );
        for key in &keys {
            queue.add(*key);
        }
        let distinct: HashSet<u8> = keys.iter().copied().collect();
        prop_assert_eq!(queue.len(), distinct.len());
        prop_assert_eq!(queue.is_empty(), keys.is_empty());
    }
}
