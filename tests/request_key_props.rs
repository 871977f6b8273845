use dtools_export::request_key::RequestKey;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn field_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-zA-Z][a-zA-Z0-9]{0,8}", 1..8)
}

proptest! {
    #[test]
    fn key_ignores_field_order(fields in field_names(), seed in any::<u64>()) {
        let mut shuffled = fields.clone();
        // Deterministic rotation plus reversal stands in for a shuffle
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        let a = RequestKey::new("Projects/GetProject", &fields, [("id", "42")]);
        let b = RequestKey::new("Projects/GetProject", &shuffled, [("id", "42")]);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.canonical(), b.canonical());
        prop_assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn key_ignores_scope_order(id in "[0-9]{1,6}", stage in "[A-Za-z ]{1,12}") {
        let a = RequestKey::new("Projects/GetProject", ["name"], [("id", id.as_str()), ("stage", stage.as_str())]);
        let b = RequestKey::new("Projects/GetProject", ["name"], [("stage", stage.as_str()), ("id", id.as_str())]);
        prop_assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn covering_is_field_superset(fields in field_names(), split in 0usize..8) {
        let all: BTreeSet<String> = fields.iter().cloned().collect();
        let subset: Vec<String> = all.iter().take(split.max(1)).cloned().collect();

        let stored = RequestKey::new("Projects/GetProject", &all, [("id", "1")]);
        let wanted = RequestKey::new("Projects/GetProject", &subset, [("id", "1")]);
        prop_assert!(stored.covers(&wanted));
        prop_assert_eq!(wanted.covers(&stored), subset.len() == all.len());

        let other_scope = RequestKey::new("Projects/GetProject", &subset, [("id", "2")]);
        prop_assert!(!stored.covers(&other_scope));
    }

    #[test]
    fn distinct_keys_get_distinct_digests(
        a in prop::collection::vec("[a-c,&=|]{1,4}", 1..4),
        b in prop::collection::vec("[a-c,&=|]{1,4}", 1..4),
    ) {
        let ka = RequestKey::new("Projects/GetProject", &a, [("id", "1")]);
        let kb = RequestKey::new("Projects/GetProject", &b, [("id", "1")]);
        prop_assert_eq!(ka == kb, ka.digest() == kb.digest());
    }
}
