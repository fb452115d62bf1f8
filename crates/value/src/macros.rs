/// Build a [`MapValue`](crate::MapValue) literal from `"name" => value`
/// pairs, panicking on an invalid field name. Values go through
/// `Value::from`, so plain Rust literals work for the common types.
#[macro_export]
macro_rules! fields {
    () => {
        $crate::MapValue::empty()
    };
    ( $($key:expr => $value:expr),+ $(,)? ) => {{
        let mut m = std::collections::BTreeMap::new();
        $(
            m.insert(
                <$crate::FieldName as std::str::FromStr>::from_str($key)
                    .expect("invalid field name literal"),
                $crate::Value::from($value),
            );
        )+
        $crate::MapValue::from(m)
    }};
}

/// Build an array [`Value`](crate::Value) from elements convertible via
/// `Value::from`.
#[macro_export]
macro_rules! array {
    ( $($element:expr),* $(,)? ) => {
        $crate::Value::Array(vec![$($crate::Value::from($element)),*])
    };
}
