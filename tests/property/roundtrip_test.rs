// tests/property/roundtrip_test.rs

//! Property-based tests for the value codec
//! Encoding then decoding with the value's own type must give the value back,
//! and decoding arbitrary bytes must fail cleanly rather than panic

use bytes::Bytes;
use proptest::prelude::*;
use topicwire::core::codec::{DataType, Value, decode, encode};

fn any_json() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-z ]{0,12}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

fn any_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Int64),
        any::<f64>()
            .prop_filter("NaN never compares equal", |d| !d.is_nan())
            .prop_map(Value::Double),
        ".{0,200}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..200).prop_map(|b| Value::Binary(Bytes::from(b))),
        any_json().prop_map(Value::Json),
    ]
}

fn any_data_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Int64),
        Just(DataType::Double),
        Just(DataType::String),
        Just(DataType::Binary),
        Just(DataType::Json),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_value_roundtrip(value in any_value()) {
        let encoded = encode(&value).unwrap();
        let decoded = decode(value.data_type(), &encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_as_other_type_is_rejected(value in any_value(), expected in any_data_type()) {
        prop_assume!(expected != value.data_type());
        prop_assert!(decode(expected, &encode(&value).unwrap()).is_err());
    }

    #[test]
    fn test_decode_arbitrary_bytes_never_panics(
        expected in any_data_type(),
        bytes in prop::collection::vec(any::<u8>(), 0..64)
    ) {
        let _ = decode(expected, &bytes);
    }

    #[test]
    fn test_truncated_payload_is_rejected(value in any_value(), cut in 1usize..16) {
        let encoded = encode(&value).unwrap();
        let keep = encoded.len().saturating_sub(cut);
        prop_assert!(decode(value.data_type(), &encoded[..keep]).is_err());
    }
}
