//! Property tests for the snapshot codec.

use keepsake_codec::{strip_nulls, KeyMaterial, PlayerSnapshot, SnapshotCodec};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::String),
    ]
}

fn key() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z][a-zA-Z0-9_]{0,12}",
        Just("session_token".to_string()),
        Just("password".to_string()),
        Just("a/b~c".to_string()),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key(), inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn snapshot() -> impl Strategy<Value = PlayerSnapshot> {
    (
        "[a-z0-9-]{1,20}",
        any::<u64>(),
        prop::collection::btree_map("[a-z_]{1,10}", tree(), 0..5),
    )
        .prop_map(|(user_id, updated_at, sections)| PlayerSnapshot {
            user_id,
            updated_at,
            sections,
        })
}

fn normalized(mut snapshot: PlayerSnapshot) -> PlayerSnapshot {
    snapshot.sections.retain(|_, v| !v.is_null());
    for value in snapshot.sections.values_mut() {
        strip_nulls(value);
    }
    snapshot
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn expand_inverts_compact(snapshot in snapshot()) {
        let codec = SnapshotCodec::default();
        let key = KeyMaterial::new(b"proptest".to_vec());

        let payload = codec.compact(&snapshot, &key).unwrap();
        let restored = codec.expand(&payload, &key).unwrap();

        prop_assert_eq!(restored, normalized(snapshot));
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let codec = SnapshotCodec::default();
        let key = KeyMaterial::new(b"proptest".to_vec());
        let _ = codec.expand(&bytes, &key);
    }
}
