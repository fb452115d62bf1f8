//! The typed value model stored in documents, plus field/document addressing.
//!
//! [`Value`] is the closed set of types a document field can hold. The
//! canonical total order over values lives in [`canonical_cmp`]; the JSON
//! wire bijection lives in [`wire`].

#[macro_use]
mod macros;

mod compare;
mod document_path;
mod field_name;
mod field_path;
mod map_value;
mod reference;
mod timestamp;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod proptest;

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{
        self,
        Display,
    },
};

use errors::ErrorMetadata;

pub use crate::{
    compare::{
        canonical_cmp,
        canonical_eq,
        filter_eq,
        type_rank,
        TypeRank,
    },
    document_path::{
        CollectionId,
        CollectionPath,
        DocumentId,
        DocumentPath,
    },
    field_name::FieldName,
    field_path::FieldPath,
    map_value::MapValue,
    reference::Reference,
    timestamp::Timestamp,
};

/// The various types that can be stored as a field in a document.
#[derive(Clone, Debug)]
pub enum Value {
    /// Sentinel `Null` value.
    Null,

    /// Boolean value.
    Boolean(bool),

    /// 64-bit signed integer.
    Int64(i64),

    /// IEEE754 double-precision floating point number. NaNs, infinities,
    /// negative zero, and subnormals are all representable.
    Float64(f64),

    /// Point in time, truncated to microsecond precision on ingress.
    Timestamp(Timestamp),

    /// UTF-8 text.
    String(String),

    /// Arbitrary binary data.
    Bytes(Vec<u8>),

    /// Absolute, database-scoped pointer to another document.
    Reference(Reference),

    /// Latitude/longitude pair.
    GeoPoint(GeoPoint),

    /// Heterogeneous list. Arrays may not directly contain other arrays.
    Array(Vec<Value>),

    /// String-keyed mapping to nested values.
    Map(MapValue),

    /// Fixed-length sequence of doubles used by nearest-neighbor queries.
    Vector(Vec<f64>),
}

/// A geographical point. Ordered by latitude, then longitude.
#[derive(Clone, Copy, Debug)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GeoPoint {}

impl PartialOrd for GeoPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GeoPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.latitude
            .total_cmp(&other.latitude)
            .then_with(|| self.longitude.total_cmp(&other.longitude))
    }
}

impl Value {
    /// Returns a string description of the type of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Int64(_) => "Int64",
            Value::Float64(_) => "Float64",
            Value::Timestamp(_) => "Timestamp",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Reference(_) => "Reference",
            Value::GeoPoint(_) => "GeoPoint",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
            Value::Vector(_) => "Vector",
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Float64(f) if f.is_nan())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check that a value is storable: arrays may not directly contain
    /// arrays, at any depth of the value tree.
    pub fn validate_for_write(&self) -> anyhow::Result<()> {
        match self {
            Value::Array(elements) => {
                for element in elements {
                    if let Value::Array(_) = element {
                        anyhow::bail!(ErrorMetadata::invalid_argument(
                            "NestedArray",
                            "Arrays may not contain arrays directly",
                        ));
                    }
                    element.validate_for_write()?;
                }
                Ok(())
            },
            Value::Map(map) => {
                for (_, nested) in map.iter() {
                    nested.validate_for_write()?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        canonical_eq(self, other)
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_cmp(self, other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}

impl From<GeoPoint> for Value {
    fn from(g: GeoPoint) -> Self {
        Value::GeoPoint(g)
    }
}

impl From<Vec<Value>> for Value {
    fn from(vs: Vec<Value>) -> Self {
        Value::Array(vs)
    }
}

impl From<MapValue> for Value {
    fn from(m: MapValue) -> Self {
        Value::Map(m)
    }
}

impl From<BTreeMap<FieldName, Value>> for Value {
    fn from(m: BTreeMap<FieldName, Value>) -> Self {
        Value::Map(MapValue::from(m))
    }
}

impl TryFrom<Value> for i64 {
    type Error = anyhow::Error;

    fn try_from(v: Value) -> anyhow::Result<Self> {
        match v {
            Value::Int64(i) => Ok(i),
            _ => anyhow::bail!("Value must be an integer"),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = anyhow::Error;

    fn try_from(v: Value) -> anyhow::Result<Self> {
        match v {
            Value::String(s) => Ok(s),
            _ => anyhow::bail!("Value must be a string"),
        }
    }
}

impl TryFrom<Value> for MapValue {
    type Error = anyhow::Error;

    fn try_from(v: Value) -> anyhow::Result<Self> {
        match v {
            Value::Map(m) => Ok(m),
            _ => anyhow::bail!("Value must be a map"),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b:?}"),
            Value::Int64(n) => write!(f, "{n}"),
            Value::Float64(n) => write!(f, "{n:?}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Reference(r) => write!(f, "{r}"),
            Value::GeoPoint(g) => write!(f, "[{}, {}]", g.latitude, g.longitude),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            },
            Value::Map(m) => write!(f, "{m}"),
            Value::Vector(vs) => write!(f, "vector({vs:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_array_rejected() {
        let v = Value::Array(vec![Value::Array(vec![Value::Int64(1)])]);
        assert!(v.validate_for_write().is_err());
    }

    #[test]
    fn test_array_in_map_in_array_allowed() {
        let inner = fields!("xs" => Value::Array(vec![Value::Int64(1)]));
        let v = Value::Array(vec![Value::Map(inner)]);
        assert!(v.validate_for_write().is_ok());
    }

    #[test]
    fn test_deeply_nested_array_rejected() {
        let inner = fields!("xs" => Value::Array(vec![
            Value::Array(vec![Value::Int64(1)]),
        ]));
        let v = Value::Map(fields!("outer" => Value::Map(inner)));
        assert!(v.validate_for_write().is_err());
    }
}
