//! The canonical total order over [`Value`]s.
//!
//! Values of different types order by type rank:
//! Null < Boolean < NaN < Numbers < Timestamp < String < Bytes < Reference <
//! GeoPoint < Array < Vector < Map. Int64 and Float64 share a rank and
//! compare numerically without precision loss. NaN sorts below every number
//! and compares equal to itself for ordering and indexing purposes; the
//! filter equality relation treats NaN as unequal to everything, including
//! itself.

use std::cmp::Ordering;

use crate::Value;

/// Rank of a value's type in the canonical cross-type order. NaN ranks as
/// its own pseudo-type below the numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeRank {
    Null,
    Boolean,
    NaN,
    Number,
    Timestamp,
    String,
    Bytes,
    Reference,
    GeoPoint,
    Array,
    Vector,
    Map,
}

pub fn type_rank(v: &Value) -> TypeRank {
    match v {
        Value::Null => TypeRank::Null,
        Value::Boolean(_) => TypeRank::Boolean,
        Value::Float64(f) if f.is_nan() => TypeRank::NaN,
        Value::Int64(_) | Value::Float64(_) => TypeRank::Number,
        Value::Timestamp(_) => TypeRank::Timestamp,
        Value::String(_) => TypeRank::String,
        Value::Bytes(_) => TypeRank::Bytes,
        Value::Reference(_) => TypeRank::Reference,
        Value::GeoPoint(_) => TypeRank::GeoPoint,
        Value::Array(_) => TypeRank::Array,
        Value::Vector(_) => TypeRank::Vector,
        Value::Map(_) => TypeRank::Map,
    }
}

/// Compare an integer against a non-NaN double without converting the
/// integer to f64 (which would lose precision above 2^53).
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    debug_assert!(!f.is_nan());
    if f.is_infinite() {
        return if f > 0.0 { Ordering::Less } else { Ordering::Greater };
    }
    // 2^63 is exactly representable; anything at or beyond it is outside
    // i64's range.
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    if f >= TWO_63 {
        return Ordering::Less;
    }
    if f < -TWO_63 {
        return Ordering::Greater;
    }
    let truncated = f.trunc() as i64;
    match i.cmp(&truncated) {
        Ordering::Equal => {
            let fraction = f - truncated as f64;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        },
        other => other,
    }
}

fn cmp_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Float64(x), Value::Float64(y)) => {
            x.partial_cmp(y).expect("NaN handled by type rank")
        },
        (Value::Int64(x), Value::Float64(y)) => cmp_int_float(*x, *y),
        (Value::Float64(x), Value::Int64(y)) => cmp_int_float(*y, *x).reverse(),
        _ => unreachable!("non-numbers at Number rank"),
    }
}

/// The canonical total order. NaN == NaN under this relation.
pub fn canonical_cmp(a: &Value, b: &Value) -> Ordering {
    let rank_a = type_rank(a);
    let rank_b = type_rank(b);
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match rank_a {
        TypeRank::Null | TypeRank::NaN => Ordering::Equal,
        TypeRank::Boolean => match (a, b) {
            (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::Number => cmp_numbers(a, b),
        TypeRank::Timestamp => match (a, b) {
            (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::String => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::Bytes => match (a, b) {
            (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::Reference => match (a, b) {
            (Value::Reference(x), Value::Reference(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::GeoPoint => match (a, b) {
            (Value::GeoPoint(x), Value::GeoPoint(y)) => x.cmp(y),
            _ => unreachable!(),
        },
        TypeRank::Array => match (a, b) {
            (Value::Array(xs), Value::Array(ys)) => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    let ord = canonical_cmp(x, y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                xs.len().cmp(&ys.len())
            },
            _ => unreachable!(),
        },
        TypeRank::Vector => match (a, b) {
            // Vectors order by dimension first, then componentwise.
            (Value::Vector(xs), Value::Vector(ys)) => xs
                .len()
                .cmp(&ys.len())
                .then_with(|| {
                    for (x, y) in xs.iter().zip(ys.iter()) {
                        let ord = x.total_cmp(y);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                }),
            _ => unreachable!(),
        },
        TypeRank::Map => match (a, b) {
            (Value::Map(xs), Value::Map(ys)) => {
                for ((k1, v1), (k2, v2)) in xs.iter().zip(ys.iter()) {
                    let ord = k1.cmp(k2).then_with(|| canonical_cmp(v1, v2));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                xs.len().cmp(&ys.len())
            },
            _ => unreachable!(),
        },
    }
}

/// Equality under the canonical order: NaN equals NaN, and numerically equal
/// integers and doubles are equal.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    canonical_cmp(a, b) == Ordering::Equal
}

/// The equality used by `==` filters: identical to canonical equality except
/// a NaN anywhere in either operand makes the comparison false.
pub fn filter_eq(a: &Value, b: &Value) -> bool {
    if contains_nan(a) || contains_nan(b) {
        return false;
    }
    canonical_eq(a, b)
}

fn contains_nan(v: &Value) -> bool {
    match v {
        Value::Float64(f) => f.is_nan(),
        Value::Array(elements) => elements.iter().any(contains_nan),
        Value::Map(m) => m.iter().any(|(_, nested)| contains_nan(nested)),
        _ => false,
    }
}
