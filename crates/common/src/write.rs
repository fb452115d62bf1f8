//! Write operations: batches, merges, preconditions, and the sentinel
//! payload ADT.
//!
//! Payloads for set/create/update are trees of [`FieldWrite`], not plain
//! [`Value`]s: a leaf is either a concrete value or a server-side
//! [`Transform`]. Modeling sentinels as a variant makes their placement
//! rules structural — a transform can never end up inside an array or a
//! stored value.

use std::{
    collections::BTreeMap,
    fmt::{
        self,
        Debug,
    },
};

use errors::ErrorMetadata;
use value::{
    DocumentPath,
    FieldName,
    FieldPath,
    MapValue,
    Timestamp,
    Value,
};

/// A server-computed field update.
#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    /// Remove the field.
    Delete,
    /// Resolve to the commit's assigned timestamp.
    ServerTimestamp,
    /// Numeric add; missing or non-numeric base counts as zero.
    Increment(Value),
    /// Append elements not already present under canonical equality.
    ArrayUnion(Vec<Value>),
    /// Remove all canonically equal elements.
    ArrayRemove(Vec<Value>),
    /// Materialize a vector value.
    Vector(Vec<f64>),
}

impl Transform {
    fn validate(&self) -> anyhow::Result<()> {
        match self {
            Transform::Delete | Transform::ServerTimestamp | Transform::Vector(_) => Ok(()),
            Transform::Increment(operand) => match operand {
                Value::Int64(_) | Value::Float64(_) => Ok(()),
                other => Err(ErrorMetadata::invalid_argument(
                    "InvalidTransform",
                    format!("increment operand must be numeric, got {}", other.type_name()),
                )
                .into()),
            },
            Transform::ArrayUnion(elements) | Transform::ArrayRemove(elements) => {
                // Elements land inside an array, so they may not themselves
                // be arrays.
                Value::Array(elements.clone()).validate_for_write()
            },
        }
    }
}

/// One position in a write payload: a plain value, a transform sentinel, or
/// a nested map that may carry sentinels further down.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldWrite {
    Value(Value),
    Transform(Transform),
    Map(BTreeMap<FieldName, FieldWrite>),
}

impl FieldWrite {
    pub fn from_value(value: Value) -> Self {
        FieldWrite::Value(value)
    }

    fn validate(&self, allow_delete: bool) -> anyhow::Result<()> {
        match self {
            FieldWrite::Value(v) => v.validate_for_write(),
            FieldWrite::Transform(Transform::Delete) if !allow_delete => {
                Err(ErrorMetadata::invalid_argument(
                    "InvalidSentinel",
                    "delete sentinels are only valid in update payloads and merge targets",
                )
                .into())
            },
            FieldWrite::Transform(t) => t.validate(),
            FieldWrite::Map(entries) => {
                for write in entries.values() {
                    write.validate(allow_delete)?;
                }
                Ok(())
            },
        }
    }
}

/// A set/create payload: top-level fields to field writes.
pub type WriteFields = BTreeMap<FieldName, FieldWrite>;

/// Convert a plain data map into a payload with no sentinels.
pub fn write_fields_of(data: MapValue) -> WriteFields {
    data.into_iter()
        .map(|(k, v)| (k, FieldWrite::Value(v)))
        .collect()
}

/// How a `Set` treats fields absent from its payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Merge {
    /// Deep-merge at every leaf path present in the payload.
    All,
    /// Write only the listed paths; listed paths absent from the payload are
    /// deleted.
    Fields(Vec<FieldPath>),
}

/// Guard evaluated against the current document before an op applies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Precondition {
    Exists(bool),
    /// Must equal the current document's `updateTime` exactly.
    UpdateTime(Timestamp),
}

/// One mutation within a batch.
#[derive(Clone, Debug)]
pub enum Operation {
    Create {
        path: DocumentPath,
        data: WriteFields,
    },
    Set {
        path: DocumentPath,
        data: WriteFields,
        merge: Option<Merge>,
    },
    Update {
        path: DocumentPath,
        data: Vec<(FieldPath, FieldWrite)>,
        precondition: Option<Precondition>,
    },
    Delete {
        path: DocumentPath,
        precondition: Option<Precondition>,
    },
}

impl Operation {
    pub fn create(path: DocumentPath, data: WriteFields) -> anyhow::Result<Self> {
        for write in data.values() {
            write.validate(false)?;
        }
        Ok(Operation::Create { path, data })
    }

    pub fn set(path: DocumentPath, data: WriteFields) -> anyhow::Result<Self> {
        for write in data.values() {
            write.validate(false)?;
        }
        Ok(Operation::Set {
            path,
            data,
            merge: None,
        })
    }

    pub fn set_merge(path: DocumentPath, data: WriteFields, merge: Merge) -> anyhow::Result<Self> {
        for write in data.values() {
            write.validate(true)?;
        }
        if let Merge::Fields(ref mask) = merge {
            anyhow::ensure!(
                !mask.is_empty(),
                ErrorMetadata::invalid_argument(
                    "EmptyMergeMask",
                    "set with mergeFields requires at least one field path",
                )
            );
        }
        Ok(Operation::Set {
            path,
            data,
            merge: Some(merge),
        })
    }

    pub fn update(
        path: DocumentPath,
        data: Vec<(FieldPath, FieldWrite)>,
        precondition: Option<Precondition>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !data.is_empty(),
            ErrorMetadata::invalid_argument("EmptyUpdate", "update payloads must be non-empty")
        );
        if let Some(Precondition::Exists(false)) = precondition {
            anyhow::bail!(ErrorMetadata::invalid_argument(
                "InvalidPrecondition",
                "exists: false preconditions are not valid on update",
            ));
        }
        for (_, write) in &data {
            write.validate(true)?;
        }
        Ok(Operation::Update {
            path,
            data,
            precondition,
        })
    }

    pub fn delete(path: DocumentPath, precondition: Option<Precondition>) -> Self {
        Operation::Delete { path, precondition }
    }

    pub fn path(&self) -> &DocumentPath {
        match self {
            Operation::Create { path, .. }
            | Operation::Set { path, .. }
            | Operation::Update { path, .. }
            | Operation::Delete { path, .. } => path,
        }
    }
}

/// An atomic, ordered list of operations. Either every operation applies or
/// none do.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub operations: Vec<Operation>,
}

impl Batch {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Per-operation commit acknowledgement. `write_results[i]` aligns with
/// `operations[i]`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub write_time: Timestamp,
}

impl Debug for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WriteResult({})", self.write_time)
    }
}
