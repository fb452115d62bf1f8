//! Proptest strategies for generating arbitrary [`Value`]s.

use proptest::prelude::*;

use crate::{
    FieldName,
    GeoPoint,
    MapValue,
    Reference,
    Timestamp,
    Value,
};

pub fn float64_strategy() -> impl Strategy<Value = f64> {
    prop::num::f64::ANY | prop::num::f64::SIGNALING_NAN
}

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i64>().prop_map(Value::Int64),
        float64_strategy().prop_map(Value::Float64),
        any::<Timestamp>().prop_map(Value::Timestamp),
        "[a-z]{0,8}".prop_map(Value::String),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
        ("[a-z]{1,4}", "[a-z]{1,4}").prop_map(|(c, d)| {
            let path = format!("{c}/{d}").parse().expect("valid document path");
            Value::Reference(Reference::new("p", "(default)", path))
        }),
        (-90.0f64..90.0, -180.0f64..180.0).prop_map(|(latitude, longitude)| {
            Value::GeoPoint(GeoPoint {
                latitude,
                longitude,
            })
        }),
        prop::collection::vec(-10.0f64..10.0, 0..4).prop_map(Value::Vector),
    ]
}

/// Arbitrary values, nesting arrays and maps up to a small depth. Arrays
/// never directly contain arrays, so every generated value passes
/// `validate_for_write`.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 16, 4, |inner| {
        let array_element = inner.clone().prop_filter("no arrays in arrays", |v| {
            !matches!(v, Value::Array(_))
        });
        prop_oneof![
            prop::collection::vec(array_element, 0..4).prop_map(Value::Array),
            prop::collection::btree_map(any::<FieldName>(), inner, 0..4)
                .prop_map(|m| Value::Map(MapValue::from(m))),
        ]
    })
}

impl Arbitrary for Value {
    type Parameters = ();

    type Strategy = BoxedStrategy<Value>;

    fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
        value_strategy().boxed()
    }
}
