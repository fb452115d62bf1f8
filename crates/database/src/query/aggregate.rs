//! Aggregation over query results: COUNT, SUM, AVG.

use std::collections::BTreeMap;

use common::{
    document::Document,
    query::{
        Aggregate,
        AggregateKind,
    },
};
use value::{
    FieldPath,
    Value,
};

/// Compute every requested aggregate over the result rows. Non-numeric and
/// missing field values are ignored by SUM and AVG.
pub fn compute_aggregates(
    aggregates: &[Aggregate],
    docs: &[Document],
) -> BTreeMap<String, Value> {
    aggregates
        .iter()
        .map(|agg| {
            let value = match &agg.kind {
                AggregateKind::Count => Value::Int64(docs.len() as i64),
                AggregateKind::Sum(field) => sum(field, docs),
                AggregateKind::Avg(field) => avg(field, docs),
            };
            (agg.alias.clone(), value)
        })
        .collect()
}

fn numeric_values<'a>(field: &'a FieldPath, docs: &'a [Document]) -> impl Iterator<Item = &'a Value> {
    docs.iter().filter_map(move |doc| match doc.get(field) {
        Some(v @ (Value::Int64(_) | Value::Float64(_))) => Some(v),
        _ => None,
    })
}

/// SUM stays integer while every input is an integer; any float promotes the
/// result. An empty input sums to integer zero.
fn sum(field: &FieldPath, docs: &[Document]) -> Value {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut all_int = true;
    for v in numeric_values(field, docs) {
        match v {
            Value::Int64(i) => {
                if all_int {
                    match int_sum.checked_add(*i) {
                        Some(next) => int_sum = next,
                        None => {
                            // Integer overflow promotes to float.
                            all_int = false;
                            float_sum = int_sum as f64 + *i as f64;
                        },
                    }
                } else {
                    float_sum += *i as f64;
                }
            },
            Value::Float64(f) => {
                if all_int {
                    all_int = false;
                    float_sum = int_sum as f64 + f;
                } else {
                    float_sum += f;
                }
            },
            _ => unreachable!("numeric_values filters non-numbers"),
        }
    }
    if all_int {
        Value::Int64(int_sum)
    } else {
        Value::Float64(float_sum)
    }
}

/// AVG over an empty input is NULL; otherwise always a double.
fn avg(field: &FieldPath, docs: &[Document]) -> Value {
    let mut count = 0u64;
    let mut total = 0.0f64;
    for v in numeric_values(field, docs) {
        count += 1;
        total += match v {
            Value::Int64(i) => *i as f64,
            Value::Float64(f) => *f,
            _ => unreachable!(),
        };
    }
    if count == 0 {
        Value::Null
    } else {
        Value::Float64(total / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use value::{
        fields,
        MapValue,
        Timestamp,
    };

    use super::*;

    fn doc(id: &str, data: MapValue) -> Document {
        Document::new(
            format!("c/{id}").parse().unwrap(),
            data,
            Timestamp::from_unix_micros(1),
            Timestamp::from_unix_micros(1),
        )
    }

    fn aggs() -> Vec<Aggregate> {
        vec![
            Aggregate {
                alias: "count".to_owned(),
                kind: AggregateKind::Count,
            },
            Aggregate {
                alias: "sum".to_owned(),
                kind: AggregateKind::Sum("n".parse().unwrap()),
            },
            Aggregate {
                alias: "avg".to_owned(),
                kind: AggregateKind::Avg("n".parse().unwrap()),
            },
        ]
    }

    #[test]
    fn test_integer_sum_stays_integer() {
        let docs = vec![
            doc("a", fields!("n" => 1i64)),
            doc("b", fields!("n" => 2i64)),
            doc("c", fields!("n" => "skipped")),
        ];
        let out = compute_aggregates(&aggs(), &docs);
        assert_eq!(out["count"], Value::Int64(3));
        assert_eq!(out["sum"], Value::Int64(3));
        assert_eq!(out["avg"], Value::Float64(1.5));
    }

    #[test]
    fn test_float_promotes_sum() {
        let docs = vec![
            doc("a", fields!("n" => 1i64)),
            doc("b", fields!("n" => 0.5f64)),
        ];
        let out = compute_aggregates(&aggs(), &docs);
        assert_eq!(out["sum"], Value::Float64(1.5));
    }

    #[test]
    fn test_empty_set() {
        let out = compute_aggregates(&aggs(), &[]);
        assert_eq!(out["count"], Value::Int64(0));
        assert_eq!(out["sum"], Value::Int64(0));
        assert_eq!(out["avg"], Value::Null);
    }

    #[test]
    fn test_overflow_promotes() {
        let docs = vec![
            doc("a", fields!("n" => i64::MAX)),
            doc("b", fields!("n" => 1i64)),
        ];
        let out = compute_aggregates(&aggs(), &docs);
        match out["sum"] {
            Value::Float64(f) => assert!(f > i64::MAX as f64 - 2.0),
            ref other => panic!("expected float sum, got {other}"),
        }
    }
}
