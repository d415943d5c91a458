// tests/property/cache_test.rs

//! Property-based tests for the object cache
//! Tests that updates replace by id rather than append, and that a batch with
//! a bad object changes nothing.

use gatewire::core::cache::{ObjectCache, ObjectType};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

proptest! {
    #[test]
    fn test_size_counts_distinct_ids(
        batches in vec(vec((0u32..50, "[a-z]{0,8}"), 0..20), 1..5),
    ) {
        let cache = ObjectCache::new();
        let object_type = ObjectType::from("CARD");
        let mut expected: BTreeMap<u32, String> = BTreeMap::new();

        for batch in &batches {
            let raw: Vec<String> = batch
                .iter()
                .map(|(id, name)| format!("[OI{id};NM{name};]"))
                .collect();
            cache.update(&raw, &object_type).unwrap();
            for (id, name) in batch {
                expected.insert(*id, name.clone());
            }
        }

        prop_assert_eq!(cache.size(&object_type), expected.len());
        for (id, name) in &expected {
            let object = cache.get(&object_type, &id.to_string()).unwrap();
            prop_assert_eq!(object.get("NM"), Some(name.as_str()));
        }
    }

    #[test]
    fn test_bad_object_rejects_whole_batch(
        ids in vec(0u32..50, 1..20),
        bad_at in any::<prop::sample::Index>(),
    ) {
        let cache = ObjectCache::new();
        let object_type = ObjectType::from("CARD");
        cache.update(["[OI999;]"], &object_type).unwrap();

        let mut raw: Vec<String> = ids.iter().map(|id| format!("[OI{id};]")).collect();
        let at = bad_at.index(raw.len());
        raw[at] = "[NMno id;]".to_string();

        prop_assert!(cache.update(&raw, &object_type).is_err());
        let ids_now: BTreeSet<String> = cache
            .get_objects(&object_type)
            .iter()
            .map(|o| o.id().to_string())
            .collect();
        prop_assert_eq!(ids_now, BTreeSet::from(["999".to_string()]));
    }
}
