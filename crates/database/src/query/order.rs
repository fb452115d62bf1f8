//! The order-by comparator and cursor positioning.

use std::cmp::Ordering;

use common::{
    document::Document,
    query::{
        Cursor,
        Direction,
        OrderBy,
    },
};
use value::{
    canonical_cmp,
    DocumentPath,
    Value,
};

/// Compare two documents under the normalized order-by list. Missing fields
/// sort last ascending and first descending.
pub fn compare_docs(order_by: &[OrderBy], a: &Document, b: &Document) -> Ordering {
    for order in order_by {
        let ord = if order.is_on_name() {
            a.path().cmp(b.path())
        } else {
            compare_field(a.get(&order.field), b.get(&order.field))
        };
        let ord = apply_direction(ord, order.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => canonical_cmp(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn apply_direction(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Ascending => ord,
        Direction::Descending => ord.reverse(),
    }
}

/// Compare a document's position against a cursor tuple. The cursor binds
/// to the leading prefix of the order-by list.
pub fn compare_to_cursor(order_by: &[OrderBy], doc: &Document, cursor: &Cursor) -> Ordering {
    for (order, expected) in order_by.iter().zip(cursor.values.iter()) {
        let ord = if order.is_on_name() {
            compare_name(doc.path(), expected)
        } else {
            match doc.get(&order.field) {
                Some(actual) => canonical_cmp(actual, expected),
                None => Ordering::Greater,
            }
        };
        let ord = apply_direction(ord, order.direction);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Cursor values for `__name__` may be references or relative path strings.
fn compare_name(path: &DocumentPath, expected: &Value) -> Ordering {
    match expected {
        Value::Reference(r) => path.cmp(r.path()),
        Value::String(s) => match s.parse::<DocumentPath>() {
            Ok(expected_path) => path.cmp(&expected_path),
            Err(_) => path.to_string().as_str().cmp(s),
        },
        _ => Ordering::Greater,
    }
}

/// Whether a row positioned at `ord` relative to the start cursor survives.
/// `before == true` is start-at (inclusive); `before == false` start-after
/// (exclusive).
pub fn after_start(ord: Ordering, cursor: &Cursor) -> bool {
    if cursor.before {
        ord != Ordering::Less
    } else {
        ord == Ordering::Greater
    }
}

/// Whether a row positioned at `ord` relative to the end cursor survives.
/// `before == true` is end-before (exclusive); `before == false` end-at
/// (inclusive).
pub fn before_end(ord: Ordering, cursor: &Cursor) -> bool {
    if cursor.before {
        ord == Ordering::Less
    } else {
        ord != Ordering::Greater
    }
}
