//! The structured query model and its build-time validation rules.
//!
//! A [`Query`] arrives in client shape and is [`Query::normalize`]d before
//! execution: inequality fields are folded into the order-by list and the
//! `__name__` tiebreaker is appended. Normalization is idempotent, and every
//! validation error it produces is `INVALID_ARGUMENT`.

use std::{
    collections::BTreeSet,
    str::FromStr,
    sync::LazyLock,
};

use errors::ErrorMetadata;
use itertools::Itertools;
use value::{
    CollectionId,
    DocumentPath,
    FieldPath,
    Value,
};

/// The pseudo-field that orders documents by their full path.
pub const NAME_FIELD: &str = "__name__";

pub static NAME_FIELD_PATH: LazyLock<FieldPath> =
    LazyLock::new(|| FieldPath::from_str(NAME_FIELD).expect("__name__ parses"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeOp {
    And,
    Or,
}

/// Field comparison operators. `Ne` and `NotIn` count as inequalities for
/// order-by purposes, as do the `IsNot*` unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FieldOp {
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FieldOp::Lt | FieldOp::Le | FieldOp::Gt | FieldOp::Ge | FieldOp::Ne | FieldOp::NotIn
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    IsNan,
    IsNull,
    IsNotNan,
    IsNotNull,
}

impl UnaryOp {
    pub fn is_inequality(&self) -> bool {
        matches!(self, UnaryOp::IsNotNan | UnaryOp::IsNotNull)
    }
}

#[derive(Clone, Debug)]
pub enum Filter {
    Composite {
        op: CompositeOp,
        filters: Vec<Filter>,
    },
    Field {
        field: FieldPath,
        op: FieldOp,
        value: Value,
    },
    Unary {
        op: UnaryOp,
        field: FieldPath,
    },
}

impl Filter {
    /// Every field constrained by an inequality anywhere in the tree, in
    /// first-visit order.
    pub fn inequality_fields(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.collect_inequality_fields(&mut out);
        out
    }

    fn collect_inequality_fields(&self, out: &mut Vec<FieldPath>) {
        match self {
            Filter::Composite { filters, .. } => {
                for filter in filters {
                    filter.collect_inequality_fields(out);
                }
            },
            Filter::Field { field, op, .. } if op.is_inequality() => {
                if !out.contains(field) {
                    out.push(field.clone());
                }
            },
            Filter::Unary { op, field } if op.is_inequality() => {
                if !out.contains(field) {
                    out.push(field.clone());
                }
            },
            Filter::Field { .. } | Filter::Unary { .. } => {},
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: FieldPath,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: FieldPath) -> Self {
        OrderBy {
            field,
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: FieldPath) -> Self {
        OrderBy {
            field,
            direction: Direction::Descending,
        }
    }

    pub fn is_on_name(&self) -> bool {
        self.field == *NAME_FIELD_PATH
    }
}

/// A cursor position over the order-by tuple. `before == true` positions the
/// cursor immediately before matching rows (start-at / end-before);
/// `before == false` immediately after (start-after / end-at).
#[derive(Clone, Debug)]
pub struct Cursor {
    pub values: Vec<Value>,
    pub before: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMeasure {
    Euclidean,
    Cosine,
    DotProduct,
}

pub const MAX_FIND_NEAREST_LIMIT: usize = 1000;

#[derive(Clone, Debug)]
pub struct FindNearest {
    pub vector_field: FieldPath,
    pub query_vector: Vec<f64>,
    pub limit: usize,
    pub measure: DistanceMeasure,
    pub distance_threshold: Option<f64>,
    pub distance_result_field: Option<FieldPath>,
}

/// A structured query against one collection or a collection group.
#[derive(Clone, Debug, Default)]
pub struct Query {
    /// Parent document, or `None` for the root.
    pub parent: Option<DocumentPath>,
    pub collection_id: Option<CollectionId>,
    /// Collection-group scan: match `collection_id` at any depth under the
    /// parent.
    pub all_descendants: bool,
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub start_at: Option<Cursor>,
    pub end_at: Option<Cursor>,
    pub offset: i64,
    pub limit: Option<i64>,
    /// Projection: `Some(vec![])` means id-only.
    pub select: Option<Vec<FieldPath>>,
    pub find_nearest: Option<FindNearest>,
}

impl Query {
    pub fn collection(parent: Option<DocumentPath>, collection_id: CollectionId) -> Self {
        Query {
            parent,
            collection_id: Some(collection_id),
            ..Default::default()
        }
    }

    pub fn collection_group(collection_id: CollectionId) -> Self {
        Query {
            collection_id: Some(collection_id),
            all_descendants: true,
            ..Default::default()
        }
    }

    /// Validate the query and derive its effective order-by list:
    ///
    /// 1. With any inequality present, the first explicit order-by must be on
    ///    an inequality field.
    /// 2. Inequality fields missing from the order-by are appended in
    ///    lexicographic order, ascending.
    /// 3. `__name__` is appended last, inheriting the last explicit
    ///    direction.
    /// 4. Cursor value counts may not exceed the final order-by length.
    pub fn normalize(mut self) -> anyhow::Result<Query> {
        anyhow::ensure!(
            self.offset >= 0,
            ErrorMetadata::invalid_argument("InvalidOffset", "offset must be non-negative")
        );
        if let Some(limit) = self.limit {
            anyhow::ensure!(
                limit >= 0,
                ErrorMetadata::invalid_argument("InvalidLimit", "limit must be non-negative")
            );
        }

        let inequality_fields: Vec<FieldPath> = self
            .filter
            .as_ref()
            .map(|f| f.inequality_fields())
            .unwrap_or_default();
        if !inequality_fields.is_empty() {
            if let Some(first) = self.order_by.first() {
                anyhow::ensure!(
                    inequality_fields.contains(&first.field) || first.is_on_name(),
                    ErrorMetadata::invalid_argument(
                        "InvalidOrderBy",
                        format!(
                            "the first orderBy field {} must match an inequality field",
                            first.field
                        ),
                    )
                );
            }
        }

        let explicit: BTreeSet<FieldPath> =
            self.order_by.iter().map(|o| o.field.clone()).collect();
        for field in inequality_fields.into_iter().sorted() {
            if !explicit.contains(&field) && field != *NAME_FIELD_PATH {
                self.order_by.push(OrderBy::asc(field));
            }
        }

        if !self.order_by.iter().any(|o| o.is_on_name()) {
            let direction = self
                .order_by
                .last()
                .map(|o| o.direction)
                .unwrap_or(Direction::Ascending);
            self.order_by.push(OrderBy {
                field: NAME_FIELD_PATH.clone(),
                direction,
            });
        }

        for cursor in [&self.start_at, &self.end_at].into_iter().flatten() {
            anyhow::ensure!(
                cursor.values.len() <= self.order_by.len(),
                ErrorMetadata::invalid_argument(
                    "InvalidCursor",
                    format!(
                        "cursor has {} values but the query orders by {} fields",
                        cursor.values.len(),
                        self.order_by.len()
                    ),
                )
            );
        }

        if let Some(ref nearest) = self.find_nearest {
            anyhow::ensure!(
                nearest.limit > 0 && nearest.limit <= MAX_FIND_NEAREST_LIMIT,
                ErrorMetadata::invalid_argument(
                    "InvalidFindNearest",
                    format!(
                        "findNearest limit must be in 1..={MAX_FIND_NEAREST_LIMIT}, got {}",
                        nearest.limit
                    ),
                )
            );
            anyhow::ensure!(
                !nearest.query_vector.is_empty(),
                ErrorMetadata::invalid_argument(
                    "InvalidFindNearest",
                    "findNearest query vector must be non-empty",
                )
            );
        }

        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum(FieldPath),
    Avg(FieldPath),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub alias: String,
    pub kind: AggregateKind,
}

/// Resolve aliases for an aggregation request: missing aliases are
/// auto-generated, duplicates are rejected.
pub fn resolve_aggregate_aliases(
    specs: Vec<(Option<String>, AggregateKind)>,
) -> anyhow::Result<Vec<Aggregate>> {
    anyhow::ensure!(
        !specs.is_empty(),
        ErrorMetadata::invalid_argument(
            "EmptyAggregation",
            "aggregation queries require at least one aggregation",
        )
    );
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(specs.len());
    for (i, (alias, kind)) in specs.into_iter().enumerate() {
        let alias = alias.unwrap_or_else(|| format!("aggregate_{i}"));
        anyhow::ensure!(
            seen.insert(alias.clone()),
            ErrorMetadata::invalid_argument(
                "DuplicateAggregateAlias",
                format!("duplicate aggregation alias {alias:?}"),
            )
        );
        out.push(Aggregate { alias, kind });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;

    use super::*;

    fn field(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    fn base_query() -> Query {
        Query::collection(None, "users".parse().unwrap())
    }

    #[test]
    fn test_name_tiebreaker_appended() {
        let q = base_query().normalize().unwrap();
        assert_eq!(q.order_by.len(), 1);
        assert!(q.order_by[0].is_on_name());
        assert_eq!(q.order_by[0].direction, Direction::Ascending);
    }

    #[test]
    fn test_name_inherits_last_direction() {
        let mut q = base_query();
        q.order_by.push(OrderBy::desc(field("a")));
        let q = q.normalize().unwrap();
        assert_eq!(q.order_by.len(), 2);
        assert_eq!(q.order_by[1].direction, Direction::Descending);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut q = base_query();
        q.order_by.push(OrderBy::asc(field("a")));
        let once = q.normalize().unwrap();
        let twice = once.clone().normalize().unwrap();
        assert_eq!(once.order_by, twice.order_by);
    }

    #[test]
    fn test_inequality_fields_appended_sorted() {
        let mut q = base_query();
        q.filter = Some(Filter::Composite {
            op: CompositeOp::And,
            filters: vec![
                Filter::Field {
                    field: field("b"),
                    op: FieldOp::Gt,
                    value: Value::Int64(0),
                },
                Filter::Field {
                    field: field("a"),
                    op: FieldOp::Lt,
                    value: Value::Int64(10),
                },
            ],
        });
        q.order_by.push(OrderBy::asc(field("b")));
        let q = q.normalize().unwrap();
        let fields: Vec<String> = q.order_by.iter().map(|o| o.field.to_string()).collect();
        assert_eq!(fields, vec!["b", "a", "__name__"]);
    }

    #[test]
    fn test_first_order_by_must_be_inequality() {
        let mut q = base_query();
        q.filter = Some(Filter::Field {
            field: field("a"),
            op: FieldOp::Gt,
            value: Value::Int64(0),
        });
        q.order_by.push(OrderBy::asc(field("other")));
        let err = q.normalize().unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(err.short_msg(), "InvalidOrderBy");
    }

    #[test]
    fn test_not_in_counts_as_inequality() {
        let mut q = base_query();
        q.filter = Some(Filter::Field {
            field: field("a"),
            op: FieldOp::NotIn,
            value: Value::Array(vec![Value::Int64(1)]),
        });
        let q = q.normalize().unwrap();
        let fields: Vec<String> = q.order_by.iter().map(|o| o.field.to_string()).collect();
        assert_eq!(fields, vec!["a", "__name__"]);
    }

    #[test]
    fn test_cursor_length_validated() {
        let mut q = base_query();
        q.order_by.push(OrderBy::asc(field("a")));
        q.start_at = Some(Cursor {
            values: vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)],
            before: true,
        });
        let err = q.normalize().unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_negative_limit_rejected() {
        let mut q = base_query();
        q.limit = Some(-1);
        assert!(q.normalize().is_err());
    }

    #[test]
    fn test_find_nearest_limit_capped() {
        let mut q = base_query();
        q.find_nearest = Some(FindNearest {
            vector_field: field("embedding"),
            query_vector: vec![1.0],
            limit: 1001,
            measure: DistanceMeasure::Euclidean,
            distance_threshold: None,
            distance_result_field: None,
        });
        assert!(q.normalize().is_err());
    }

    #[test]
    fn test_aggregate_aliases() {
        let resolved = resolve_aggregate_aliases(vec![
            (None, AggregateKind::Count),
            (Some("total".to_owned()), AggregateKind::Sum(field("n"))),
        ])
        .unwrap();
        assert_eq!(resolved[0].alias, "aggregate_0");
        assert_eq!(resolved[1].alias, "total");

        let err = resolve_aggregate_aliases(vec![
            (Some("x".to_owned()), AggregateKind::Count),
            (Some("x".to_owned()), AggregateKind::Count),
        ])
        .unwrap_err();
        assert_eq!(err.short_msg(), "DuplicateAggregateAlias");
    }
}
