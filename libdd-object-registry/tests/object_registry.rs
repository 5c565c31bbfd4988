// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libdd_object_registry::{
    BucketDistribution, ObjectRegistry, RegistryConfig, RegistryError, NULL_ID,
};
use proptest::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

type Object = Arc<dyn Any + Send + Sync>;

#[derive(Debug)]
struct Node {
    #[allow(dead_code)]
    name: &'static str,
}

fn node(name: &'static str) -> Object {
    Arc::new(Node { name })
}

#[test]
fn registers_four_objects_and_rejects_a_fifth_on_a_taken_id() {
    let registry: ObjectRegistry = ObjectRegistry::new();
    let objects: Vec<Object> = vec![node("a"), node("b"), node("c"), node("d")];

    for (object_id, object) in (100..).zip(&objects) {
        assert_eq!(registry.register_object(object_id, object), Ok(true));
    }
    for (object_id, object) in (100..).zip(&objects) {
        assert_eq!(registry.lookup_object_id(object), Some(object_id));
        let found = registry.lookup_object(object_id).unwrap();
        assert!(Arc::ptr_eq(&found, object));
    }

    let fifth = node("e");
    assert_eq!(
        registry.register_object(100, &fifth),
        Err(RegistryError::ObjectIdConflict { object_id: 100 })
    );
    assert!(Arc::ptr_eq(&registry.lookup_object(100).unwrap(), &objects[0]));
    assert_eq!(registry.lookup_object_id(&fifth), None);
    assert_eq!(registry.size(), 4);
}

#[test]
fn registering_twice_is_a_no_op() {
    let registry = ObjectRegistry::<String>::new();
    let object = Arc::new(String::from("twice"));
    assert_eq!(registry.register_object(5, &object), Ok(true));
    assert_eq!(registry.register_object(5, &object), Ok(false));
    assert_eq!(registry.size(), 1);
}

#[test]
fn one_object_cannot_take_two_ids() {
    let registry = ObjectRegistry::<String>::new();
    let object = Arc::new(String::from("object"));
    registry.register_object(1, &object).unwrap();
    assert_eq!(
        registry.register_object(2, &object),
        Err(RegistryError::ObjectConflict {
            object_id: 2,
            registered_object_id: 1
        })
    );
    assert!(!registry.contains_object_id(2));
    assert_eq!(registry.lookup_object_id(&object), Some(1));
}

#[test]
fn null_id_is_rejected_before_anything_changes() {
    let registry = ObjectRegistry::<String>::new();
    let object = Arc::new(String::from("object"));
    let expected = Err(RegistryError::ImproperObjectId(NULL_ID));
    assert_eq!(registry.register_object(NULL_ID, &object), expected);
    assert_eq!(registry.register_constant(NULL_ID, &object), expected);
    assert_eq!(
        registry.optional_register_object(NULL_ID, &object).err(),
        Some(RegistryError::ImproperObjectId(NULL_ID))
    );
    assert!(registry.is_empty());
    assert_eq!(registry.constant_count(), 0);
}

#[test]
fn optional_register_returns_the_canonical_object() {
    let registry = ObjectRegistry::<String>::new();
    let first = Arc::new(String::from("same"));
    let second = Arc::new(String::from("same"));

    let canonical = registry.optional_register_object(7, &first).unwrap();
    assert!(Arc::ptr_eq(&canonical, &first));
    let canonical = registry.optional_register_object(7, &second).unwrap();
    assert!(Arc::ptr_eq(&canonical, &first));

    assert_eq!(registry.lookup_object_id(&second), None);
    assert_eq!(registry.size(), 1);
}

#[test]
fn optional_register_still_rejects_identity_conflicts() {
    let registry = ObjectRegistry::<String>::new();
    let object = Arc::new(String::from("object"));
    registry.register_object(1, &object).unwrap();
    assert_eq!(
        registry.optional_register_object(2, &object).err(),
        Some(RegistryError::ObjectConflict {
            object_id: 2,
            registered_object_id: 1
        })
    );
}

#[test]
fn dropped_objects_become_invisible_and_are_cleaned_up() {
    let registry = ObjectRegistry::<String>::new();
    let kept = Arc::new(String::from("kept"));
    let dropped = Arc::new(String::from("dropped"));
    registry.register_object(1, &kept).unwrap();
    registry.register_object(2, &dropped).unwrap();
    drop(dropped);

    assert!(registry.lookup_object(2).is_none());
    assert!(registry.contains_object_id(2));
    assert_eq!(registry.size(), 2);

    let mut seen = Vec::new();
    registry.iterate_entries(|object_id, object| seen.push((object_id, object.is_some())));
    seen.sort();
    assert_eq!(seen, vec![(1, true), (2, false)]);

    assert_eq!(registry.clean_up(), 1);
    assert_eq!(registry.size(), 1);
    assert!(!registry.contains_object_id(2));
    assert_eq!(registry.lookup_object_id(&kept), Some(1));
    assert_eq!(registry.clean_up(), 0);
}

#[test]
fn consolidate_shrinks_after_mass_drop() {
    let registry = ObjectRegistry::<u64>::new();
    let objects: Vec<_> = (1..=4096u64).map(Arc::new).collect();
    for object in &objects {
        registry.register_object(**object, object).unwrap();
    }
    let grown = registry.hash_length();
    assert!(grown >= 4096);

    let survivor = objects[0].clone();
    drop(objects);
    assert!(registry.consolidate());
    assert_eq!(registry.size(), 1);
    assert!(registry.hash_length() < grown);
    assert_eq!(registry.lookup_object_id(&survivor), Some(1));
}

#[test]
fn constants_survive_clear_and_truncate() {
    let registry = ObjectRegistry::<String>::new();
    let constant = Arc::new(String::from("TRUE"));
    let transient = Arc::new(String::from("transient"));
    assert_eq!(registry.register_constant(1, &constant), Ok(true));
    registry.register_object(2, &transient).unwrap();

    registry.clear();
    assert!(Arc::ptr_eq(&registry.lookup_object(1).unwrap(), &constant));
    assert!(registry.lookup_object(2).is_none());
    assert_eq!(registry.size(), 1);

    registry.register_object(2, &transient).unwrap();
    registry.truncate();
    assert!(Arc::ptr_eq(&registry.lookup_object(1).unwrap(), &constant));
    assert_eq!(registry.lookup_object_id(&transient), None);
    assert_eq!(registry.size(), 1);
}

#[test]
fn constants_are_kept_alive() {
    let registry = ObjectRegistry::<String>::new();
    registry
        .register_constant(1, &Arc::new(String::from("ONLY HERE")))
        .unwrap();
    registry.clear();
    assert_eq!(
        registry.lookup_object(1).as_deref().map(String::as_str),
        Some("ONLY HERE")
    );
}

#[test]
fn clear_all_drops_constants() {
    let registry = ObjectRegistry::<String>::new();
    let constant = Arc::new(String::from("constant"));
    registry.register_constant(1, &constant).unwrap();

    registry.clear_all();
    assert!(registry.is_empty());
    assert_eq!(registry.constant_count(), 0);
    registry.clear();
    assert!(registry.lookup_object(1).is_none());

    registry.register_constant(1, &constant).unwrap();
    registry.truncate_all();
    assert!(registry.is_empty());
    assert_eq!(registry.constant_count(), 0);
}

#[test]
fn truncate_returns_to_the_floor() {
    let config = RegistryConfig::default().with_minimum_capacity(16);
    let registry = ObjectRegistry::<u64>::try_with_config(config).unwrap();
    let objects: Vec<_> = (1..=1000u64).map(Arc::new).collect();
    for object in &objects {
        registry.register_object(**object, object).unwrap();
    }
    assert!(registry.hash_length() >= 1024);

    registry.clear();
    assert!(registry.hash_length() >= 1024, "clear keeps the tables");
    registry.truncate();
    assert_eq!(registry.hash_length(), 16);
    assert!(registry.is_empty());
}

#[test]
fn many_inserts_keep_both_directions_consistent() {
    let registry = ObjectRegistry::<u64>::new();
    let objects: Vec<_> = (1..=10_000u64).map(Arc::new).collect();
    let mut rebuilds = 0;
    let mut hash_length = registry.hash_length();

    for (i, object) in objects.iter().enumerate() {
        registry.register_object(**object, object).unwrap();
        if registry.hash_length() != hash_length {
            hash_length = registry.hash_length();
            rebuilds += 1;
            for earlier in &objects[..=i] {
                assert_eq!(registry.lookup_object_id(earlier), Some(**earlier));
            }
        }
    }
    assert!(rebuilds > 5);
    for object in &objects {
        assert_eq!(registry.lookup_object_id(object), Some(**object));
        assert!(Arc::ptr_eq(&registry.lookup_object(**object).unwrap(), object));
    }
    assert_eq!(registry.size(), 10_000);
}

#[test]
fn validate_reports_the_conflicting_side() {
    let registry = ObjectRegistry::<String>::new();
    let registered = Arc::new(String::from("registered"));
    let other = Arc::new(String::from("other"));
    registry.register_object(1, &registered).unwrap();

    assert!(registry.is_valid(1, &registered));
    assert!(registry.is_valid(2, &other));
    assert!(!registry.is_valid(1, &other));
    assert_eq!(
        registry.validate(1, &other),
        Err(RegistryError::ObjectIdConflict { object_id: 1 })
    );
    assert_eq!(
        registry.validate(3, &registered),
        Err(RegistryError::ObjectConflict {
            object_id: 3,
            registered_object_id: 1
        })
    );
}

#[test]
fn select_live_object_ids_filters_unknown_ids() {
    let registry = ObjectRegistry::<u64>::new();
    let objects: Vec<_> = [3u64, 5, 8].into_iter().map(Arc::new).collect();
    for object in &objects {
        registry.register_object(**object, object).unwrap();
    }
    assert_eq!(registry.select_live_object_ids(1..=8), vec![3, 5, 8]);
}

#[test]
fn statistics_cover_every_slot() {
    let config = RegistryConfig::default().with_minimum_capacity(64);
    let registry = ObjectRegistry::<u64>::try_with_config(config).unwrap();
    let objects: Vec<_> = (1..=40u64).map(Arc::new).collect();
    for object in &objects {
        registry.register_object(**object, object).unwrap();
    }

    let stats = registry.create_hash_statistics();
    for table in [&stats.per_object_ids, &stats.per_objects] {
        assert_eq!(table.hash_length, 64);
        assert_eq!(table.size, 40);
        assert_eq!(table.hash_density, 1.0);
        let slots: usize = table.distribution.iter().map(|d| d.slots).sum();
        assert_eq!(slots, 64);
        let entries: usize = table.distribution.iter().map(|d| d.length * d.slots).sum();
        assert_eq!(entries, 40);
        assert!(table
            .distribution
            .windows(2)
            .all(|w| w[0].length + 1 == w[1].length));
        assert_eq!(table.distribution.last().map(|d| d.length), Some(table.longest_bucket));
    }

    // Consecutive object ids land in distinct slots.
    assert_eq!(
        stats.per_object_ids.distribution,
        vec![
            BucketDistribution { length: 0, slots: 24 },
            BucketDistribution { length: 1, slots: 40 },
        ]
    );
    assert_eq!(registry.size(), 40);
}

#[test]
fn empty_clone_keeps_configuration_only() {
    let config = RegistryConfig::default()
        .with_hash_density(2.0)
        .with_minimum_capacity(256);
    let registry = ObjectRegistry::<u64>::try_with_config(config).unwrap();
    let object = Arc::new(1u64);
    registry.register_object(1, &object).unwrap();

    let clone = registry.empty_clone();
    assert_eq!(clone.config(), config);
    assert_eq!(clone.hash_length(), registry.hash_length());
    assert!(clone.is_empty());
}

#[test]
fn concurrent_registration_keeps_one_mapping_per_object() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 2_000;

    let registry = Arc::new(ObjectRegistry::<u64>::new());
    let shared: Arc<Vec<Arc<u64>>> = Arc::new((1..=PER_THREAD).map(Arc::new).collect());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            let shared = shared.clone();
            thread::spawn(move || {
                let own: Vec<_> = (0..PER_THREAD)
                    .map(|i| Arc::new(1_000_000 + t * PER_THREAD + i))
                    .collect();
                for object in &own {
                    assert_eq!(registry.register_object(**object, object), Ok(true));
                }
                // Every thread races to intern the same shared objects.
                for object in shared.iter() {
                    let canonical = registry.optional_register_object(**object, object).unwrap();
                    assert!(Arc::ptr_eq(&canonical, object));
                }
                for object in &own {
                    assert_eq!(registry.lookup_object_id(object), Some(**object));
                }
                own
            })
        })
        .collect();

    let owned: Vec<Vec<Arc<u64>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(registry.size(), THREADS * PER_THREAD + PER_THREAD);
    for object in owned.iter().flatten().chain(shared.iter()) {
        assert_eq!(registry.lookup_object_id(object), Some(**object));
        assert!(Arc::ptr_eq(&registry.lookup_object(**object).unwrap(), object));
    }
}

#[derive(Clone, Debug)]
enum Op {
    Register(u64, usize),
    OptionalRegister(u64, usize),
    Drop(usize),
    CleanUp,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..64u64, 0..32usize).prop_map(|(id, slot)| Op::Register(id, slot)),
        2 => (1..64u64, 0..32usize).prop_map(|(id, slot)| Op::OptionalRegister(id, slot)),
        1 => (0..32usize).prop_map(Op::Drop),
        1 => Just(Op::CleanUp),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: if cfg!(miri) { 4 } else { 64 },
        .. ProptestConfig::default()
    })]

    #[test]
    fn proptest_matches_shadow_mapping(ops in proptest::collection::vec(op(), 0..256)) {
        let registry = ObjectRegistry::<u64>::new();
        let mut slots: Vec<Option<Arc<u64>>> = (0..32u64).map(|v| Some(Arc::new(v))).collect();
        // Object id -> slot, for associations whose object is still alive.
        let mut shadow: HashMap<u64, usize> = HashMap::new();

        for op in ops {
            match op {
                Op::Register(id, slot) | Op::OptionalRegister(id, slot) => {
                    let Some(object) = slots[slot].clone() else { continue };
                    let held_by = shadow.get(&id).copied();
                    let owner = shadow.iter().find(|(_, s)| **s == slot).map(|(id, _)| *id);
                    let optional = matches!(op, Op::OptionalRegister(..));
                    if optional {
                        let result = registry.optional_register_object(id, &object);
                        match (held_by, owner) {
                            (Some(s), _) => {
                                let canonical = slots[s].clone().unwrap();
                                prop_assert!(Arc::ptr_eq(&result.unwrap(), &canonical));
                            }
                            (None, Some(_)) => prop_assert!(result.is_err()),
                            (None, None) => {
                                prop_assert!(Arc::ptr_eq(&result.unwrap(), &object));
                                shadow.insert(id, slot);
                            }
                        }
                    } else {
                        let result = registry.register_object(id, &object);
                        match (held_by, owner) {
                            (Some(s), _) if s == slot => prop_assert_eq!(result, Ok(false)),
                            (Some(_), _) | (None, Some(_)) => prop_assert!(result.is_err()),
                            (None, None) => {
                                prop_assert_eq!(result, Ok(true));
                                shadow.insert(id, slot);
                            }
                        }
                    }
                }
                Op::Drop(slot) => {
                    slots[slot] = None;
                    shadow.retain(|_, s| *s != slot);
                }
                Op::CleanUp => {
                    registry.clean_up();
                    prop_assert_eq!(registry.size(), shadow.len() as u64);
                }
            }

            for (id, slot) in &shadow {
                let object = slots[*slot].as_ref().unwrap();
                prop_assert_eq!(registry.lookup_object_id(object), Some(*id));
                prop_assert!(Arc::ptr_eq(&registry.lookup_object(*id).unwrap(), object));
            }
            for (slot, object) in slots.iter().enumerate() {
                if let Some(object) = object {
                    if !shadow.values().any(|s| *s == slot) {
                        prop_assert_eq!(registry.lookup_object_id(object), None);
                    }
                }
            }
        }
    }
}
