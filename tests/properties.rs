use proptest::prelude::*;
use serde_json::{Map, Value};

use thoth::metafile::{ValueDiff, deep_merge, deep_merge_maps, marshal_meta, parse_meta};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        "s[a-z]{0,6}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,5}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn json_map() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,5}", json_value(), 0..5)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn merge_with_empty_patch_is_identity(meta in json_map()) {
        prop_assert_eq!(deep_merge_maps(&meta, &Map::new()), meta);
    }

    #[test]
    fn merge_replaces_arrays_wholesale(a in prop::collection::vec(json_value(), 0..4),
                                       b in prop::collection::vec(json_value(), 0..4)) {
        let merged = deep_merge(&serde_json::json!({"k": a}), &serde_json::json!({"k": b.clone()}));
        prop_assert_eq!(&merged["k"], &Value::from(b));
    }

    #[test]
    fn canonical_yaml_round_trips(meta in json_map()) {
        let text = marshal_meta("loc", &meta).unwrap();
        prop_assert_eq!(&marshal_meta("loc", &meta).unwrap(), &text);
        prop_assert!(text.ends_with('\n') && !text.ends_with("\n\n"));

        let doc = parse_meta(&text, false).unwrap();
        prop_assert_eq!(&doc.meta, &meta);
        prop_assert_eq!(marshal_meta(&doc.locator, &doc.meta).unwrap(), text);
    }

    #[test]
    fn diff_of_self_is_empty(v in json_value()) {
        prop_assert!(ValueDiff::compute(&v, &v).is_empty());
    }
}
