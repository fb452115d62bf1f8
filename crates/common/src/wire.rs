//! Wire forms for documents and structured queries.
//!
//! Documents travel as `{ name, fields, createTime, updateTime }` with the
//! full resource name; queries mirror the StructuredQuery JSON shape. Value
//! encoding is delegated to [`value::wire`].

use std::str::FromStr;

use errors::ErrorMetadata;
use serde_json::{
    json,
    Value as JsonValue,
};
use value::{
    wire as value_wire,
    DocumentPath,
    FieldPath,
    Timestamp,
};

use crate::{
    document::Document,
    query::{
        AggregateKind,
        CompositeOp,
        Cursor,
        Direction,
        DistanceMeasure,
        FieldOp,
        Filter,
        FindNearest,
        OrderBy,
        Query,
        UnaryOp,
    },
    types::InstanceConfig,
};

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    ErrorMetadata::invalid_argument("InvalidWireFormat", msg.into()).into()
}

/// Encode a document as its wire envelope.
pub fn encode_document(doc: &Document, config: &InstanceConfig) -> JsonValue {
    let mut out = value_wire::encode_fields(doc.data());
    out["name"] = json!(format!(
        "{}/{}",
        config.document_name_prefix(),
        doc.path()
    ));
    out["createTime"] = json!(doc.create_time().to_string());
    out["updateTime"] = json!(doc.update_time().to_string());
    out
}

/// Decode a document wire envelope. The resource name must belong to the
/// given instance.
pub fn decode_document(json: &JsonValue, config: &InstanceConfig) -> anyhow::Result<Document> {
    let name = json
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("document is missing its resource name"))?;
    let prefix = config.document_name_prefix();
    let relative = name
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| invalid(format!("resource name {name:?} is outside {prefix:?}")))?;
    let path: DocumentPath = relative.parse()?;
    let data = value_wire::decode_fields(json)?;
    let create_time = decode_time(json.get("createTime"))?.unwrap_or(Timestamp::UNIX_EPOCH);
    let update_time = decode_time(json.get("updateTime"))?.unwrap_or(create_time);
    Ok(Document::new(path, data, create_time, update_time))
}

fn decode_time(json: Option<&JsonValue>) -> anyhow::Result<Option<Timestamp>> {
    match json {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(Timestamp::from_str(s)?)),
        Some(other) => Err(invalid(format!("expected RFC 3339 timestamp, got {other}"))),
    }
}

fn field_reference(path: &FieldPath) -> JsonValue {
    json!({ "fieldPath": path.to_string() })
}

fn decode_field_reference(json: &JsonValue) -> anyhow::Result<FieldPath> {
    let s = json
        .get("fieldPath")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("expected a { fieldPath } reference"))?;
    s.parse()
}

fn field_op_name(op: FieldOp) -> &'static str {
    match op {
        FieldOp::Lt => "LESS_THAN",
        FieldOp::Le => "LESS_THAN_OR_EQUAL",
        FieldOp::Gt => "GREATER_THAN",
        FieldOp::Ge => "GREATER_THAN_OR_EQUAL",
        FieldOp::Eq => "EQUAL",
        FieldOp::Ne => "NOT_EQUAL",
        FieldOp::ArrayContains => "ARRAY_CONTAINS",
        FieldOp::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        FieldOp::In => "IN",
        FieldOp::NotIn => "NOT_IN",
    }
}

fn decode_field_op(name: &str) -> anyhow::Result<FieldOp> {
    let op = match name {
        "LESS_THAN" => FieldOp::Lt,
        "LESS_THAN_OR_EQUAL" => FieldOp::Le,
        "GREATER_THAN" => FieldOp::Gt,
        "GREATER_THAN_OR_EQUAL" => FieldOp::Ge,
        "EQUAL" => FieldOp::Eq,
        "NOT_EQUAL" => FieldOp::Ne,
        "ARRAY_CONTAINS" => FieldOp::ArrayContains,
        "ARRAY_CONTAINS_ANY" => FieldOp::ArrayContainsAny,
        "IN" => FieldOp::In,
        "NOT_IN" => FieldOp::NotIn,
        other => return Err(invalid(format!("unknown field filter op {other:?}"))),
    };
    Ok(op)
}

fn encode_filter(filter: &Filter) -> JsonValue {
    match filter {
        Filter::Composite { op, filters } => json!({
            "compositeFilter": {
                "op": match op {
                    CompositeOp::And => "AND",
                    CompositeOp::Or => "OR",
                },
                "filters": filters.iter().map(encode_filter).collect::<Vec<_>>(),
            },
        }),
        Filter::Field { field, op, value } => json!({
            "fieldFilter": {
                "field": field_reference(field),
                "op": field_op_name(*op),
                "value": value_wire::encode(value),
            },
        }),
        Filter::Unary { op, field } => json!({
            "unaryFilter": {
                "op": match op {
                    UnaryOp::IsNan => "IS_NAN",
                    UnaryOp::IsNull => "IS_NULL",
                    UnaryOp::IsNotNan => "IS_NOT_NAN",
                    UnaryOp::IsNotNull => "IS_NOT_NULL",
                },
                "field": field_reference(field),
            },
        }),
    }
}

fn decode_filter(json: &JsonValue) -> anyhow::Result<Filter> {
    if let Some(composite) = json.get("compositeFilter") {
        let op = match composite.get("op").and_then(|v| v.as_str()) {
            Some("AND") => CompositeOp::And,
            Some("OR") => CompositeOp::Or,
            other => return Err(invalid(format!("unknown composite op {other:?}"))),
        };
        let filters = composite
            .get("filters")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("compositeFilter.filters must be an array"))?
            .iter()
            .map(decode_filter)
            .collect::<anyhow::Result<Vec<_>>>()?;
        return Ok(Filter::Composite { op, filters });
    }
    if let Some(field_filter) = json.get("fieldFilter") {
        let field = decode_field_reference(
            field_filter
                .get("field")
                .ok_or_else(|| invalid("fieldFilter is missing its field"))?,
        )?;
        let op = decode_field_op(
            field_filter
                .get("op")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid("fieldFilter is missing its op"))?,
        )?;
        let value = value_wire::decode(
            field_filter
                .get("value")
                .ok_or_else(|| invalid("fieldFilter is missing its value"))?,
        )?;
        return Ok(Filter::Field { field, op, value });
    }
    if let Some(unary) = json.get("unaryFilter") {
        let op = match unary.get("op").and_then(|v| v.as_str()) {
            Some("IS_NAN") => UnaryOp::IsNan,
            Some("IS_NULL") => UnaryOp::IsNull,
            Some("IS_NOT_NAN") => UnaryOp::IsNotNan,
            Some("IS_NOT_NULL") => UnaryOp::IsNotNull,
            other => return Err(invalid(format!("unknown unary op {other:?}"))),
        };
        let field = decode_field_reference(
            unary
                .get("field")
                .ok_or_else(|| invalid("unaryFilter is missing its field"))?,
        )?;
        return Ok(Filter::Unary { op, field });
    }
    Err(invalid("filter must be composite, field, or unary"))
}

fn encode_cursor(cursor: &Cursor) -> JsonValue {
    json!({
        "values": cursor.values.iter().map(value_wire::encode).collect::<Vec<_>>(),
        "before": cursor.before,
    })
}

fn decode_cursor(json: &JsonValue) -> anyhow::Result<Cursor> {
    let values = match json.get("values") {
        None => vec![],
        Some(JsonValue::Array(values)) => values
            .iter()
            .map(value_wire::decode)
            .collect::<anyhow::Result<_>>()?,
        Some(_) => return Err(invalid("cursor.values must be an array")),
    };
    let before = json
        .get("before")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(Cursor { values, before })
}

/// Encode a query as StructuredQuery JSON.
pub fn encode_query(query: &Query) -> JsonValue {
    let mut out = serde_json::Map::new();
    if let Some(ref collection_id) = query.collection_id {
        out.insert(
            "from".to_owned(),
            json!([{
                "collectionId": collection_id.as_str(),
                "allDescendants": query.all_descendants,
            }]),
        );
    }
    if let Some(ref filter) = query.filter {
        out.insert("where".to_owned(), encode_filter(filter));
    }
    if !query.order_by.is_empty() {
        let order_by: Vec<JsonValue> = query
            .order_by
            .iter()
            .map(|o| {
                json!({
                    "field": field_reference(&o.field),
                    "direction": match o.direction {
                        Direction::Ascending => "ASCENDING",
                        Direction::Descending => "DESCENDING",
                    },
                })
            })
            .collect();
        out.insert("orderBy".to_owned(), json!(order_by));
    }
    if let Some(ref cursor) = query.start_at {
        out.insert("startAt".to_owned(), encode_cursor(cursor));
    }
    if let Some(ref cursor) = query.end_at {
        out.insert("endAt".to_owned(), encode_cursor(cursor));
    }
    if query.offset > 0 {
        out.insert("offset".to_owned(), json!(query.offset));
    }
    if let Some(limit) = query.limit {
        out.insert("limit".to_owned(), json!({ "value": limit }));
    }
    if let Some(ref select) = query.select {
        let fields: Vec<JsonValue> = select.iter().map(field_reference).collect();
        out.insert("select".to_owned(), json!({ "fields": fields }));
    }
    if let Some(ref nearest) = query.find_nearest {
        let mut fn_out = serde_json::Map::new();
        fn_out.insert(
            "vectorField".to_owned(),
            field_reference(&nearest.vector_field),
        );
        fn_out.insert(
            "queryVector".to_owned(),
            json!({ "vectorValue": { "values": nearest.query_vector } }),
        );
        fn_out.insert("limit".to_owned(), json!(nearest.limit));
        fn_out.insert(
            "distanceMeasure".to_owned(),
            json!(match nearest.measure {
                DistanceMeasure::Euclidean => "EUCLIDEAN",
                DistanceMeasure::Cosine => "COSINE",
                DistanceMeasure::DotProduct => "DOT_PRODUCT",
            }),
        );
        if let Some(threshold) = nearest.distance_threshold {
            fn_out.insert("distanceThreshold".to_owned(), json!(threshold));
        }
        if let Some(ref field) = nearest.distance_result_field {
            fn_out.insert("distanceResultField".to_owned(), json!(field.to_string()));
        }
        out.insert("findNearest".to_owned(), JsonValue::Object(fn_out));
    }
    JsonValue::Object(out)
}

/// Decode StructuredQuery JSON scoped to a parent document (or the root).
pub fn decode_query(parent: Option<DocumentPath>, json: &JsonValue) -> anyhow::Result<Query> {
    let mut query = Query {
        parent,
        ..Default::default()
    };
    if let Some(from) = json.get("from") {
        let selectors = from
            .as_array()
            .ok_or_else(|| invalid("from must be an array"))?;
        anyhow::ensure!(
            selectors.len() == 1,
            invalid("from must contain exactly one collection selector")
        );
        let selector = &selectors[0];
        let collection_id = selector
            .get("collectionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("collection selector is missing collectionId"))?;
        query.collection_id = Some(collection_id.parse()?);
        query.all_descendants = selector
            .get("allDescendants")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    }
    if let Some(filter) = json.get("where") {
        query.filter = Some(decode_filter(filter)?);
    }
    if let Some(order_by) = json.get("orderBy") {
        for entry in order_by
            .as_array()
            .ok_or_else(|| invalid("orderBy must be an array"))?
        {
            let field = decode_field_reference(
                entry
                    .get("field")
                    .ok_or_else(|| invalid("orderBy entry is missing its field"))?,
            )?;
            let direction = match entry.get("direction").and_then(|v| v.as_str()) {
                None | Some("ASCENDING") | Some("DIRECTION_UNSPECIFIED") => Direction::Ascending,
                Some("DESCENDING") => Direction::Descending,
                Some(other) => return Err(invalid(format!("unknown direction {other:?}"))),
            };
            query.order_by.push(OrderBy { field, direction });
        }
    }
    if let Some(cursor) = json.get("startAt") {
        query.start_at = Some(decode_cursor(cursor)?);
    }
    if let Some(cursor) = json.get("endAt") {
        query.end_at = Some(decode_cursor(cursor)?);
    }
    if let Some(offset) = json.get("offset") {
        query.offset = offset
            .as_i64()
            .ok_or_else(|| invalid("offset must be an integer"))?;
    }
    if let Some(limit) = json.get("limit") {
        let raw = if let Some(value) = limit.get("value") {
            value
        } else {
            limit
        };
        query.limit = Some(
            raw.as_i64()
                .ok_or_else(|| invalid("limit must be an integer"))?,
        );
    }
    if let Some(select) = json.get("select") {
        let fields = match select.get("fields") {
            None => vec![],
            Some(JsonValue::Array(fields)) => fields
                .iter()
                .map(decode_field_reference)
                .collect::<anyhow::Result<_>>()?,
            Some(_) => return Err(invalid("select.fields must be an array")),
        };
        query.select = Some(fields);
    }
    if let Some(nearest) = json.get("findNearest") {
        let vector_field = match nearest.get("vectorField") {
            Some(JsonValue::String(s)) => s.parse()?,
            Some(obj) => decode_field_reference(obj)?,
            None => return Err(invalid("findNearest is missing vectorField")),
        };
        let query_vector = match value_wire::decode(
            nearest
                .get("queryVector")
                .ok_or_else(|| invalid("findNearest is missing queryVector"))?,
        )? {
            value::Value::Vector(vs) => vs,
            value::Value::Array(vs) => vs
                .into_iter()
                .map(|v| match v {
                    value::Value::Float64(f) => Ok(f),
                    value::Value::Int64(i) => Ok(i as f64),
                    other => Err(invalid(format!(
                        "queryVector components must be numeric, got {}",
                        other.type_name()
                    ))),
                })
                .collect::<anyhow::Result<_>>()?,
            other => {
                return Err(invalid(format!(
                    "queryVector must be a vector, got {}",
                    other.type_name()
                )))
            },
        };
        let limit = nearest
            .get("limit")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| invalid("findNearest is missing its limit"))?;
        let measure = match nearest.get("distanceMeasure").and_then(|v| v.as_str()) {
            Some("EUCLIDEAN") => DistanceMeasure::Euclidean,
            Some("COSINE") => DistanceMeasure::Cosine,
            Some("DOT_PRODUCT") => DistanceMeasure::DotProduct,
            other => return Err(invalid(format!("unknown distance measure {other:?}"))),
        };
        let distance_result_field = match nearest.get("distanceResultField") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(s.parse()?),
            Some(obj) => Some(decode_field_reference(obj)?),
        };
        query.find_nearest = Some(FindNearest {
            vector_field,
            query_vector,
            limit: limit as usize,
            measure,
            distance_threshold: nearest.get("distanceThreshold").and_then(|v| v.as_f64()),
            distance_result_field,
        });
    }
    Ok(query)
}

/// Decode an aggregation list: `[{ alias?, count | sum | avg }]`.
/// Unrecognized aggregation operators fail `UNIMPLEMENTED`.
pub fn decode_aggregates(
    json: &JsonValue,
) -> anyhow::Result<Vec<(Option<String>, AggregateKind)>> {
    let entries = json
        .as_array()
        .ok_or_else(|| invalid("aggregations must be an array"))?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let alias = entry
            .get("alias")
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned());
        let kind = if entry.get("count").is_some() {
            AggregateKind::Count
        } else if let Some(sum) = entry.get("sum") {
            AggregateKind::Sum(decode_field_reference(
                sum.get("field")
                    .ok_or_else(|| invalid("sum is missing its field"))?,
            )?)
        } else if let Some(avg) = entry.get("avg") {
            AggregateKind::Avg(decode_field_reference(
                avg.get("field")
                    .ok_or_else(|| invalid("avg is missing its field"))?,
            )?)
        } else {
            let op = entry
                .as_object()
                .and_then(|m| m.keys().find(|k| *k != "alias").cloned())
                .unwrap_or_else(|| "<empty>".to_owned());
            anyhow::bail!(ErrorMetadata::unimplemented(
                "UnsupportedAggregation",
                format!("aggregation operator {op:?} is not supported"),
            ));
        };
        out.push((alias, kind));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use errors::{
        ErrorCode,
        ErrorMetadataAnyhowExt,
    };
    use value::fields;

    use super::*;

    #[test]
    fn test_document_round_trip() {
        let config = InstanceConfig::default();
        let doc = Document::new(
            "users/alice".parse().unwrap(),
            fields!("n" => 3i64),
            Timestamp::from_unix_micros(10),
            Timestamp::from_unix_micros(20),
        );
        let encoded = encode_document(&doc, &config);
        assert_eq!(
            encoded["name"],
            json!("projects/default-project/databases/(default)/documents/users/alice")
        );
        let decoded = decode_document(&encoded, &config).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_document_wrong_instance_rejected() {
        let config = InstanceConfig::default();
        let doc = Document::new(
            "users/alice".parse().unwrap(),
            fields!("n" => 3i64),
            Timestamp::from_unix_micros(10),
            Timestamp::from_unix_micros(10),
        );
        let encoded = encode_document(&doc, &config);
        let other = InstanceConfig {
            project_id: "other".to_owned(),
            ..InstanceConfig::default()
        };
        assert!(decode_document(&encoded, &other).is_err());
    }

    #[test]
    fn test_query_round_trip() {
        let mut query = Query::collection(None, "users".parse().unwrap());
        query.filter = Some(Filter::Composite {
            op: CompositeOp::And,
            filters: vec![
                Filter::Field {
                    field: "age".parse().unwrap(),
                    op: FieldOp::Ge,
                    value: value::Value::Int64(21),
                },
                Filter::Unary {
                    op: UnaryOp::IsNotNull,
                    field: "name".parse().unwrap(),
                },
            ],
        });
        query.order_by.push(OrderBy::desc("age".parse().unwrap()));
        query.start_at = Some(Cursor {
            values: vec![value::Value::Int64(30)],
            before: true,
        });
        query.limit = Some(10);
        query.select = Some(vec!["age".parse().unwrap()]);

        let encoded = encode_query(&query);
        let decoded = decode_query(None, &encoded).unwrap();
        assert_eq!(decoded.collection_id, query.collection_id);
        assert_eq!(decoded.order_by, query.order_by);
        assert_eq!(decoded.limit, query.limit);
        assert_eq!(decoded.select, query.select);
        assert!(decoded.filter.is_some());
        assert!(decoded.start_at.is_some());
    }

    #[test]
    fn test_unknown_aggregation_is_unimplemented() {
        let err = decode_aggregates(&json!([{ "alias": "x", "median": {} }])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
    }

    #[test]
    fn test_aggregates_decode() {
        let specs = decode_aggregates(&json!([
            { "count": {} },
            { "alias": "s", "sum": { "field": { "fieldPath": "n" } } },
            { "avg": { "field": { "fieldPath": "n" } } },
        ]))
        .unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].1, AggregateKind::Count);
    }
}
