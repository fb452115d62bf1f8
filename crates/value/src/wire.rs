//! Bijection between [`Value`]s and their tagged JSON wire form.
//!
//! Every value encodes as a single-key object whose key names the type:
//! `nullValue`, `booleanValue`, `integerValue` (string-encoded so 64-bit
//! integer-ness survives the boundary), `doubleValue`, `timestampValue`,
//! `stringValue`, `bytesValue` (base64), `geoPointValue`, `referenceValue`,
//! `arrayValue`, `mapValue`, and `vectorValue`.

use std::{
    collections::BTreeMap,
    num::FpCategory,
    str::FromStr,
};

use errors::ErrorMetadata;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::{
    FieldName,
    GeoPoint,
    MapValue,
    Reference,
    Timestamp,
    Value,
};

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    ErrorMetadata::invalid_argument("InvalidWireValue", msg.into()).into()
}

/// Encode a value into its tagged JSON wire form.
pub fn encode(value: &Value) -> JsonValue {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Boolean(b) => json!({ "booleanValue": b }),
        Value::Int64(i) => json!({ "integerValue": i.to_string() }),
        Value::Float64(f) => {
            let is_special = matches!(f.classify(), FpCategory::Infinite | FpCategory::Nan);
            if is_special {
                let s = if f.is_nan() {
                    "NaN"
                } else if *f > 0.0 {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                json!({ "doubleValue": s })
            } else {
                json!({ "doubleValue": f })
            }
        },
        Value::Timestamp(ts) => json!({
            "timestampValue": { "seconds": ts.seconds(), "nanos": ts.nanos() },
        }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Bytes(b) => json!({ "bytesValue": base64::encode(b) }),
        Value::GeoPoint(g) => json!({
            "geoPointValue": { "latitude": g.latitude, "longitude": g.longitude },
        }),
        Value::Reference(r) => json!({ "referenceValue": r.to_string() }),
        Value::Array(elements) => {
            let values: Vec<JsonValue> = elements.iter().map(encode).collect();
            json!({ "arrayValue": { "values": values } })
        },
        Value::Map(m) => {
            let fields: serde_json::Map<String, JsonValue> = m
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), encode(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        },
        Value::Vector(vs) => json!({ "vectorValue": { "values": vs } }),
    }
}

/// Decode a tagged JSON wire form back into a value.
pub fn decode(json: &JsonValue) -> anyhow::Result<Value> {
    let JsonValue::Object(map) = json else {
        return Err(invalid(format!("Expected a tagged value object, got {json}")));
    };
    if map.len() != 1 {
        return Err(invalid(format!(
            "Tagged value objects must have exactly one key, got {}",
            map.len()
        )));
    }
    let (tag, body) = map.iter().next().expect("checked length above");
    let value = match tag.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Boolean(
            body.as_bool()
                .ok_or_else(|| invalid("booleanValue must hold a boolean"))?,
        ),
        "integerValue" => {
            let i = match body {
                JsonValue::String(s) => s
                    .parse::<i64>()
                    .map_err(|e| invalid(format!("Bad integerValue {s:?}: {e}")))?,
                JsonValue::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| invalid(format!("Bad integerValue {n}")))?,
                _ => return Err(invalid("integerValue must hold a string or number")),
            };
            Value::Int64(i)
        },
        "doubleValue" => {
            let f = match body {
                JsonValue::String(s) => match s.as_str() {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    other => return Err(invalid(format!("Bad doubleValue {other:?}"))),
                },
                JsonValue::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| invalid(format!("Bad doubleValue {n}")))?,
                _ => return Err(invalid("doubleValue must hold a number")),
            };
            Value::Float64(f)
        },
        "timestampValue" => {
            let ts = match body {
                JsonValue::String(s) => Timestamp::from_str(s)?,
                JsonValue::Object(fields) => {
                    let seconds = fields
                        .get("seconds")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    let nanos = fields
                        .get("nanos")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    Timestamp::new(seconds, nanos as u32)?
                },
                _ => return Err(invalid("timestampValue must hold a string or object")),
            };
            Value::Timestamp(ts)
        },
        "stringValue" => Value::String(
            body.as_str()
                .ok_or_else(|| invalid("stringValue must hold a string"))?
                .to_owned(),
        ),
        "bytesValue" => {
            let s = body
                .as_str()
                .ok_or_else(|| invalid("bytesValue must hold base64 text"))?;
            Value::Bytes(
                base64::decode(s).map_err(|e| invalid(format!("Bad base64: {e}")))?,
            )
        },
        "geoPointValue" => {
            let fields = body
                .as_object()
                .ok_or_else(|| invalid("geoPointValue must hold an object"))?;
            Value::GeoPoint(GeoPoint {
                latitude: fields
                    .get("latitude")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                longitude: fields
                    .get("longitude")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
            })
        },
        "referenceValue" => {
            let s = body
                .as_str()
                .ok_or_else(|| invalid("referenceValue must hold a string"))?;
            Value::Reference(Reference::from_str(s)?)
        },
        "arrayValue" => {
            let values = match body.get("values") {
                None => vec![],
                Some(JsonValue::Array(values)) => {
                    values.iter().map(decode).collect::<anyhow::Result<_>>()?
                },
                Some(_) => return Err(invalid("arrayValue.values must be an array")),
            };
            Value::Array(values)
        },
        "mapValue" => Value::Map(decode_fields(body)?),
        "vectorValue" => {
            let values = match body.get("values") {
                None => vec![],
                Some(JsonValue::Array(values)) => values
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .ok_or_else(|| invalid("vectorValue components must be numbers"))
                    })
                    .collect::<anyhow::Result<_>>()?,
                Some(_) => return Err(invalid("vectorValue.values must be an array")),
            };
            Value::Vector(values)
        },
        other => return Err(invalid(format!("Unknown value tag {other:?}"))),
    };
    Ok(value)
}

/// Decode a `{ "fields": { ... } }` envelope into a map value. Shared with
/// the document wire form, whose top level has the same shape.
pub fn decode_fields(body: &JsonValue) -> anyhow::Result<MapValue> {
    let fields = match body.get("fields") {
        None => return Ok(MapValue::empty()),
        Some(JsonValue::Object(fields)) => fields,
        Some(_) => return Err(invalid("mapValue.fields must be an object")),
    };
    let mut out = BTreeMap::new();
    for (k, v) in fields {
        let name = FieldName::try_from(k.as_str())?;
        out.insert(name, decode(v)?);
    }
    Ok(MapValue::from(out))
}

/// Encode a map value as a `{ "fields": { ... } }` envelope.
pub fn encode_fields(map: &MapValue) -> JsonValue {
    let fields: serde_json::Map<String, JsonValue> = map
        .iter()
        .map(|(k, v)| (k.as_str().to_owned(), encode(v)))
        .collect();
    json!({ "fields": fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[track_caller]
    fn assert_round_trips(v: Value) {
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert!(
            crate::canonical_eq(&v, &decoded),
            "{v} -> {encoded} -> {decoded}"
        );
    }

    #[test]
    fn test_scalar_round_trips() {
        assert_round_trips(Value::Null);
        assert_round_trips(Value::Boolean(true));
        assert_round_trips(Value::Int64(i64::MIN));
        assert_round_trips(Value::Float64(1.5));
        assert_round_trips(Value::Float64(f64::NAN));
        assert_round_trips(Value::Float64(f64::NEG_INFINITY));
        assert_round_trips(Value::Float64(-0.0));
        assert_round_trips(Value::String("héllo".to_owned()));
        assert_round_trips(Value::Bytes(vec![0, 1, 255]));
        assert_round_trips(Value::Timestamp(Timestamp::from_unix_micros(123_456_789)));
        assert_round_trips(Value::GeoPoint(GeoPoint {
            latitude: -33.5,
            longitude: 151.2,
        }));
        assert_round_trips(Value::Reference(
            "projects/p/databases/d/documents/users/alice".parse().unwrap(),
        ));
    }

    #[test]
    fn test_integerness_preserved() {
        let encoded = encode(&Value::Int64(7));
        assert_eq!(encoded, json!({ "integerValue": "7" }));
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(decoded, Value::Int64(7)));

        let encoded = encode(&Value::Float64(7.0));
        let decoded = decode(&encoded).unwrap();
        assert!(matches!(decoded, Value::Float64(f) if f == 7.0));
    }

    #[test]
    fn test_compound_round_trips() {
        assert_round_trips(Value::Array(vec![
            Value::Int64(1),
            Value::Map(fields!("nested" => "x")),
        ]));
        assert_round_trips(Value::Map(fields!(
            "a" => 1i64,
            "with space" => true,
        )));
        assert_round_trips(Value::Vector(vec![0.25, -1.0, 3.5]));
    }

    #[test]
    fn test_vector_distinct_from_array() {
        let vector = encode(&Value::Vector(vec![1.0]));
        assert!(vector.get("vectorValue").is_some());
        let array = encode(&Value::Array(vec![Value::Float64(1.0)]));
        assert!(array.get("arrayValue").is_some());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&json!({ "frobValue": 1 })).is_err());
        assert!(decode(&json!({})).is_err());
        assert!(decode(&json!(42)).is_err());
        assert!(decode(&json!({ "integerValue": "not-a-number" })).is_err());
    }

    #[test]
    fn test_timestamp_string_form_accepted() {
        let wire = "2022-08-02T22:23:58.151257Z";
        let decoded = decode(&json!({ "timestampValue": wire })).unwrap();
        let expected: Timestamp = wire.parse().unwrap();
        assert_eq!(decoded, Value::Timestamp(expected));
    }
}
