//! Fuzz target for record decoding and mirror derivation.
//!
//! Arbitrary JSON payloads must never panic the section accessors or
//! `remote_copy`, and a derived mirror must never carry local-only keys.

#![no_main]

use crd_replicator::labels::{remote_copy, LOCAL_OWNERSHIP_HINT, REPLICATION_DESTINATION, REPLICATION_REQUESTED};
use crd_replicator::record::{Record, Section};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = serde_json::from_slice::<Record>(data) else {
        return;
    };

    let _ = record.spec();
    let _ = record.status();
    let _ = record.is_deleting();

    let mirror = remote_copy(&record, "fuzz-origin", "fuzz-ns");
    assert!(!mirror.labels().contains_key(REPLICATION_REQUESTED));
    assert!(!mirror.labels().contains_key(REPLICATION_DESTINATION));
    assert!(!mirror.labels().contains_key(LOCAL_OWNERSHIP_HINT));
    assert!(mirror.section(Section::Status).is_none());
    assert!(mirror.section_eq(&record, Section::Spec));
});
