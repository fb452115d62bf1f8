//! Filter evaluation against a single document.
//!
//! Operators are a closed variant set evaluated by one function, so every
//! operator's matching rules live in one place. Range operators only match
//! values of the operand's type class; `!=` and `not-in` never match Null,
//! NaN, or missing fields.

use common::{
    document::Document,
    query::{
        CompositeOp,
        FieldOp,
        Filter,
        UnaryOp,
    },
};
use value::{
    canonical_cmp,
    canonical_eq,
    filter_eq,
    type_rank,
    Value,
};

pub fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::Composite { op, filters } => match op {
            CompositeOp::And => filters.iter().all(|f| matches(f, doc)),
            CompositeOp::Or => filters.iter().any(|f| matches(f, doc)),
        },
        Filter::Field { field, op, value } => {
            let Some(actual) = doc.get(field) else {
                return false;
            };
            eval(*op, actual, value)
        },
        Filter::Unary { op, field } => {
            let actual = doc.get(field);
            match op {
                UnaryOp::IsNan => matches!(actual, Some(v) if v.is_nan()),
                UnaryOp::IsNull => matches!(actual, Some(Value::Null)),
                UnaryOp::IsNotNan => {
                    matches!(actual, Some(v) if !v.is_nan() && !v.is_null())
                },
                UnaryOp::IsNotNull => matches!(actual, Some(v) if !v.is_null()),
            }
        },
    }
}

/// Evaluate one field operator. `actual` is the document's value at the
/// filter path.
pub fn eval(op: FieldOp, actual: &Value, expected: &Value) -> bool {
    match op {
        FieldOp::Eq => filter_eq(actual, expected),
        FieldOp::Ne => {
            if actual.is_null() || actual.is_nan() {
                return false;
            }
            !canonical_eq(actual, expected)
        },
        FieldOp::Lt | FieldOp::Le | FieldOp::Gt | FieldOp::Ge => {
            // Range comparisons never match across type classes.
            if type_rank(actual) != type_rank(expected) {
                return false;
            }
            let ord = canonical_cmp(actual, expected);
            match op {
                FieldOp::Lt => ord.is_lt(),
                FieldOp::Le => ord.is_le(),
                FieldOp::Gt => ord.is_gt(),
                FieldOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            }
        },
        FieldOp::ArrayContains => match actual {
            Value::Array(elements) => elements.iter().any(|e| filter_eq(e, expected)),
            _ => false,
        },
        FieldOp::ArrayContainsAny => match (actual, expected) {
            (Value::Array(elements), Value::Array(options)) => elements
                .iter()
                .any(|e| options.iter().any(|o| filter_eq(e, o))),
            _ => false,
        },
        FieldOp::In => match expected {
            Value::Array(options) => options.iter().any(|o| filter_eq(actual, o)),
            _ => false,
        },
        FieldOp::NotIn => {
            if actual.is_null() || actual.is_nan() {
                return false;
            }
            match expected {
                Value::Array(options) => !options.iter().any(|o| canonical_eq(actual, o)),
                _ => false,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use common::query::Filter;
    use value::{
        fields,
        DocumentPath,
        MapValue,
        Timestamp,
    };

    use super::*;

    fn doc(data: MapValue) -> Document {
        let path: DocumentPath = "c/d".parse().unwrap();
        Document::new(
            path,
            data,
            Timestamp::from_unix_micros(1),
            Timestamp::from_unix_micros(1),
        )
    }

    fn field_filter(field: &str, op: FieldOp, value: Value) -> Filter {
        Filter::Field {
            field: field.parse().unwrap(),
            op,
            value,
        }
    }

    #[test]
    fn test_eq_and_nan() {
        let d = doc(fields!("n" => f64::NAN, "m" => 1i64));
        assert!(!matches(
            &field_filter("n", FieldOp::Eq, Value::Float64(f64::NAN)),
            &d
        ));
        assert!(matches(
            &field_filter("m", FieldOp::Eq, Value::Float64(1.0)),
            &d
        ));
    }

    #[test]
    fn test_range_ops_do_not_cross_types() {
        let d = doc(fields!("s" => "abc"));
        assert!(!matches(
            &field_filter("s", FieldOp::Gt, Value::Int64(0)),
            &d
        ));
        assert!(matches(
            &field_filter("s", FieldOp::Gt, Value::from("aaa")),
            &d
        ));
    }

    #[test]
    fn test_ne_skips_null_and_nan() {
        assert!(!matches(
            &field_filter("v", FieldOp::Ne, Value::Int64(1)),
            &doc(fields!("v" => Value::Null))
        ));
        assert!(!matches(
            &field_filter("v", FieldOp::Ne, Value::Int64(1)),
            &doc(fields!("v" => f64::NAN))
        ));
        assert!(matches(
            &field_filter("v", FieldOp::Ne, Value::Int64(1)),
            &doc(fields!("v" => "other-type"))
        ));
        // Missing field never matches.
        assert!(!matches(
            &field_filter("missing", FieldOp::Ne, Value::Int64(1)),
            &doc(fields!("v" => 1i64))
        ));
    }

    #[test]
    fn test_array_ops() {
        let d = doc(fields!("xs" => Value::Array(vec![Value::Int64(1), Value::from("a")])));
        assert!(matches(
            &field_filter("xs", FieldOp::ArrayContains, Value::Int64(1)),
            &d
        ));
        assert!(!matches(
            &field_filter("xs", FieldOp::ArrayContains, Value::Int64(9)),
            &d
        ));
        assert!(matches(
            &field_filter(
                "xs",
                FieldOp::ArrayContainsAny,
                Value::Array(vec![Value::Int64(9), Value::from("a")])
            ),
            &d
        ));
    }

    #[test]
    fn test_in_and_not_in() {
        let d = doc(fields!("v" => 2i64));
        let options = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
        assert!(matches(&field_filter("v", FieldOp::In, options.clone()), &d));
        assert!(!matches(&field_filter("v", FieldOp::NotIn, options), &d));
        assert!(matches(
            &field_filter("v", FieldOp::NotIn, Value::Array(vec![Value::Int64(9)])),
            &d
        ));
    }

    #[test]
    fn test_unary_ops() {
        let d = doc(fields!("nan" => f64::NAN, "null" => Value::Null, "n" => 1i64));
        let unary = |op, field: &str| Filter::Unary {
            op,
            field: field.parse().unwrap(),
        };
        assert!(matches(&unary(UnaryOp::IsNan, "nan"), &d));
        assert!(!matches(&unary(UnaryOp::IsNan, "n"), &d));
        assert!(matches(&unary(UnaryOp::IsNull, "null"), &d));
        assert!(matches(&unary(UnaryOp::IsNotNan, "n"), &d));
        assert!(!matches(&unary(UnaryOp::IsNotNan, "nan"), &d));
        assert!(!matches(&unary(UnaryOp::IsNotNan, "null"), &d));
        assert!(matches(&unary(UnaryOp::IsNotNull, "n"), &d));
        assert!(!matches(&unary(UnaryOp::IsNotNull, "missing"), &d));
    }

    #[test]
    fn test_composite_or() {
        let d = doc(fields!("a" => 1i64));
        let f = Filter::Composite {
            op: CompositeOp::Or,
            filters: vec![
                field_filter("a", FieldOp::Eq, Value::Int64(5)),
                field_filter("a", FieldOp::Eq, Value::Int64(1)),
            ],
        };
        assert!(matches(&f, &d));
    }
}
