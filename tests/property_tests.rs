//! Property-based tests for the invariants named in `SPEC_FULL.md` §8,
//! following the `INV-*`-tagged naming convention used elsewhere in this
//! codebase's test suites. Ring-level invariants (occupancy bounds, FIFO)
//! are exercised as proptests inside `src/ring.rs`'s own unit test module,
//! close to the code they describe; these integration-level properties need
//! the full `Bus` (name directory, dynamic masks).

use proptest::prelude::*;

use fastbus_rs::{Bus, Config};

proptest! {
    /// INV-REG-02: a name resolves to its module iff `attach_name` for it has
    /// committed, across any sequence of distinct-id registrations.
    #[test]
    fn prop_name_directory_consistency(names in prop::collection::vec("[a-z]{1,8}", 1..8)) {
        let bus = Bus::new(Config::default().with_module_id_max(32)).unwrap();
        let mut bound: std::collections::HashMap<u32, String> = std::collections::HashMap::new();
        for (i, name) in names.into_iter().enumerate() {
            let id = (i + 1) as u32;
            bus.create(id, &[], &[], None, None, file!(), "t", line!()).unwrap();
            let already_bound = bound.values().any(|n| n.eq_ignore_ascii_case(&name));
            if already_bound {
                prop_assert!(bus.attach_name(id, &name).is_err());
            } else {
                bus.attach_name(id, &name).unwrap();
                bound.insert(id, name.clone());
            }
        }
        for (id, name) in &bound {
            prop_assert!(bus.try_send_by_name(*id, name, 0, 0, 0, b"").unwrap());
            let _ = id;
        }
    }

    /// add-set idempotence (§8 round-trip property): re-declaring a peer
    /// already in a module's rx set creates no new ring and leaves counters
    /// untouched.
    #[test]
    fn prop_add_set_with_existing_peer_is_noop(extra_sends in 0u64..20) {
        let bus = Bus::new(Config::default().with_module_id_max(8)).unwrap();
        bus.create(1, &[2], &[], None, None, file!(), "t", line!()).unwrap();
        bus.create(2, &[], &[1], None, None, file!(), "t", line!()).unwrap();

        for i in 0..extra_sends {
            bus.try_send(2, 1, i, 0, 0, &i.to_ne_bytes()).unwrap();
        }
        let before = bus.msg_count(1).unwrap();
        bus.add_set(1, &[2], &[]).unwrap();
        let after = bus.msg_count(1).unwrap();
        prop_assert_eq!(before, after);
    }
}
