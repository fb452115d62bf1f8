//! Batch application: precondition checks, mask-based merges, and field
//! transform evaluation.
//!
//! The committer stages a batch against the latest committed state, applying
//! operations in submission order. Nothing here mutates the tree; the output
//! is the set of per-path post-images the committer promotes atomically.

use std::collections::BTreeMap;

use common::{
    types::CommitVersion,
    write::{
        Batch,
        FieldWrite,
        Merge,
        Operation,
        Precondition,
        Transform,
        WriteFields,
        WriteResult,
    },
};
use errors::ErrorMetadata;
use value::{
    canonical_eq,
    DocumentPath,
    FieldPath,
    MapValue,
    Timestamp,
    Value,
};

use crate::tree::{
    DocumentTree,
    DocVersion,
};

/// The in-flight state of one document while a batch applies.
#[derive(Clone, Debug)]
struct Staged {
    data: Option<MapValue>,
    create_time: Timestamp,
    update_time: Option<Timestamp>,
}

/// Everything the committer needs to promote a batch.
pub struct AppliedBatch {
    /// Final post-image per mutated path, in first-touch order. Paths whose
    /// final state equals their prior state are omitted.
    pub versions: Vec<(DocumentPath, DocVersion)>,
    pub results: Vec<WriteResult>,
    pub writes: u64,
    pub deletes: u64,
    pub noop_writes: u64,
    pub noop_deletes: u64,
}

/// Apply a batch against the tree's latest state. Fails atomically: the
/// first failing operation's error aborts the whole batch.
pub fn apply_batch(
    tree: &DocumentTree,
    batch: &Batch,
    commit_ts: Timestamp,
    commit_version: CommitVersion,
) -> anyhow::Result<AppliedBatch> {
    let mut staged: BTreeMap<DocumentPath, Staged> = BTreeMap::new();
    let mut touch_order: Vec<DocumentPath> = Vec::new();
    let mut results = Vec::with_capacity(batch.operations.len());
    let mut writes = 0u64;
    let mut deletes = 0u64;
    let mut noop_writes = 0u64;
    let mut noop_deletes = 0u64;

    for op in &batch.operations {
        let path = op.path().clone();
        if !staged.contains_key(&path) {
            let current = tree.lookup(&path).and_then(|e| e.latest()).cloned();
            let entry = match current {
                Some(v) if v.exists() => Staged {
                    data: v.data.clone(),
                    create_time: v.create_time,
                    update_time: Some(v.update_time),
                },
                _ => Staged {
                    data: None,
                    create_time: commit_ts,
                    update_time: None,
                },
            };
            staged.insert(path.clone(), entry);
            touch_order.push(path.clone());
        }
        let entry = staged.get_mut(&path).expect("staged above");

        match op {
            Operation::Create { data, .. } => {
                if entry.data.is_some() {
                    anyhow::bail!(ErrorMetadata::already_exists(
                        "DocumentAlreadyExists",
                        format!("Document {path} already exists"),
                    ));
                }
                let mut post = MapValue::empty();
                let mut transforms = Vec::new();
                replace_from_fields(&mut post, data, &mut transforms);
                apply_transforms(&mut post, transforms, commit_ts)?;
                entry.data = Some(post);
                entry.create_time = commit_ts;
                entry.update_time = Some(commit_ts);
                writes += 1;
            },
            Operation::Set { data, merge, .. } => {
                let prior = entry.data.clone();
                let mut transforms = Vec::new();
                let mut post = match merge {
                    None => {
                        let mut post = MapValue::empty();
                        replace_from_fields(&mut post, data, &mut transforms);
                        post
                    },
                    Some(Merge::All) => {
                        let mut post = prior.clone().unwrap_or_else(MapValue::empty);
                        for (name, write) in data {
                            merge_write_at(
                                &mut post,
                                &FieldPath::from(name.clone()),
                                write,
                                &mut transforms,
                            );
                        }
                        post
                    },
                    Some(Merge::Fields(mask)) => {
                        let mut post = prior.clone().unwrap_or_else(MapValue::empty);
                        for mask_path in mask {
                            match lookup_write(data, mask_path) {
                                Some(write) => apply_write_at(
                                    &mut post,
                                    mask_path,
                                    &write,
                                    &mut transforms,
                                ),
                                None => {
                                    post.delete_path(mask_path);
                                },
                            }
                        }
                        post
                    },
                };
                apply_transforms(&mut post, transforms, commit_ts)?;
                let changed = match &prior {
                    Some(old) => !canonical_eq(
                        &Value::Map(old.clone()),
                        &Value::Map(post.clone()),
                    ),
                    None => true,
                };
                if changed {
                    if prior.is_none() {
                        entry.create_time = commit_ts;
                    }
                    entry.data = Some(post);
                    entry.update_time = Some(commit_ts);
                    writes += 1;
                } else {
                    noop_writes += 1;
                }
            },
            Operation::Update {
                data,
                precondition,
                ..
            } => {
                match precondition {
                    Some(Precondition::UpdateTime(expected)) => {
                        let Some(current) = entry.update_time else {
                            anyhow::bail!(not_found(&path));
                        };
                        if current != *expected {
                            anyhow::bail!(ErrorMetadata::failed_precondition(
                                "StaleUpdateTime",
                                format!(
                                    "Document {path} was updated at {current}, \
                                     precondition requires {expected}"
                                ),
                            ));
                        }
                    },
                    Some(Precondition::Exists(true)) | None => {
                        if entry.data.is_none() {
                            anyhow::bail!(not_found(&path));
                        }
                    },
                    Some(Precondition::Exists(false)) => {
                        // Rejected at operation build time.
                        anyhow::bail!(ErrorMetadata::internal(
                            "exists:false precondition reached the pipeline on update",
                        ));
                    },
                }
                let mut post = entry.data.clone().unwrap_or_else(MapValue::empty);
                let mut transforms = Vec::new();
                for (field_path, write) in data {
                    apply_write_at(&mut post, field_path, write, &mut transforms);
                }
                apply_transforms(&mut post, transforms, commit_ts)?;
                let changed = match &entry.data {
                    Some(old) => {
                        !canonical_eq(&Value::Map(old.clone()), &Value::Map(post.clone()))
                    },
                    None => true,
                };
                if changed {
                    if entry.data.is_none() {
                        entry.create_time = commit_ts;
                    }
                    entry.data = Some(post);
                    entry.update_time = Some(commit_ts);
                    writes += 1;
                } else {
                    noop_writes += 1;
                }
            },
            Operation::Delete { precondition, .. } => {
                match precondition {
                    Some(Precondition::Exists(true)) => {
                        if entry.data.is_none() {
                            anyhow::bail!(not_found(&path));
                        }
                    },
                    Some(Precondition::Exists(false)) => {
                        if entry.data.is_some() {
                            anyhow::bail!(ErrorMetadata::already_exists(
                                "DocumentAlreadyExists",
                                format!("Document {path} exists"),
                            ));
                        }
                    },
                    Some(Precondition::UpdateTime(expected)) => {
                        let Some(current) = entry.update_time else {
                            anyhow::bail!(not_found(&path));
                        };
                        if current != *expected {
                            anyhow::bail!(ErrorMetadata::failed_precondition(
                                "StaleUpdateTime",
                                format!(
                                    "Document {path} was updated at {current}, \
                                     precondition requires {expected}"
                                ),
                            ));
                        }
                    },
                    None => {},
                }
                if entry.data.is_some() {
                    entry.data = None;
                    entry.update_time = None;
                    deletes += 1;
                } else {
                    noop_deletes += 1;
                }
            },
        }
        results.push(WriteResult {
            write_time: commit_ts,
        });
    }

    // Compare final staged state against the committed state; only genuine
    // changes produce versions.
    let mut versions = Vec::new();
    for path in touch_order {
        let entry = &staged[&path];
        let current = tree.lookup(&path).and_then(|e| e.latest());
        let current_data = current.filter(|v| v.exists()).and_then(|v| v.data.clone());
        let same = match (&current_data, &entry.data) {
            (None, None) => true,
            (Some(old), Some(new)) => {
                canonical_eq(&Value::Map(old.clone()), &Value::Map(new.clone()))
            },
            _ => false,
        };
        if same {
            continue;
        }
        versions.push((
            path,
            DocVersion {
                data: entry.data.clone(),
                create_time: entry.create_time,
                update_time: commit_ts,
                committed_at: commit_version,
            },
        ));
    }

    Ok(AppliedBatch {
        versions,
        results,
        writes,
        deletes,
        noop_writes,
        noop_deletes,
    })
}

fn not_found(path: &DocumentPath) -> ErrorMetadata {
    ErrorMetadata::not_found("DocumentNotFound", format!("No document at {path}"))
}

/// Replace semantics: write the payload at `path`, clearing whatever was
/// there. Transform leaves register at their full path instead of writing.
fn apply_write_at(
    post: &mut MapValue,
    path: &FieldPath,
    write: &FieldWrite,
    transforms: &mut Vec<(FieldPath, Transform)>,
) {
    match write {
        FieldWrite::Value(v) => post.set_path(path, v.clone()),
        FieldWrite::Transform(Transform::Delete) => {
            post.delete_path(path);
        },
        FieldWrite::Transform(t) => transforms.push((path.clone(), t.clone())),
        FieldWrite::Map(entries) => {
            post.set_path(path, Value::Map(MapValue::empty()));
            for (name, nested) in entries {
                apply_write_at(post, &path.join(name.clone()), nested, transforms);
            }
        },
    }
}

fn replace_from_fields(
    post: &mut MapValue,
    data: &WriteFields,
    transforms: &mut Vec<(FieldPath, Transform)>,
) {
    for (name, write) in data {
        apply_write_at(post, &FieldPath::from(name.clone()), write, transforms);
    }
}

/// Merge semantics: nested maps merge leaf-by-leaf rather than replacing.
fn merge_write_at(
    post: &mut MapValue,
    path: &FieldPath,
    write: &FieldWrite,
    transforms: &mut Vec<(FieldPath, Transform)>,
) {
    match write {
        FieldWrite::Value(Value::Map(m)) if !m.is_empty() => {
            for (name, nested) in m.iter() {
                merge_write_at(
                    post,
                    &path.join(name.clone()),
                    &FieldWrite::Value(nested.clone()),
                    transforms,
                );
            }
        },
        FieldWrite::Map(entries) if !entries.is_empty() => {
            for (name, nested) in entries {
                merge_write_at(post, &path.join(name.clone()), nested, transforms);
            }
        },
        FieldWrite::Value(v) => post.set_path(path, v.clone()),
        FieldWrite::Transform(Transform::Delete) => {
            post.delete_path(path);
        },
        FieldWrite::Transform(t) => transforms.push((path.clone(), t.clone())),
        FieldWrite::Map(_) => post.set_path(path, Value::Map(MapValue::empty())),
    }
}

/// Navigate a payload tree to the write at `path`, looking through both
/// `FieldWrite::Map` nodes and literal map values.
fn lookup_write(data: &WriteFields, path: &FieldPath) -> Option<FieldWrite> {
    let mut current = data.get(path.first())?.clone();
    for segment in &path.segments()[1..] {
        current = match current {
            FieldWrite::Map(ref entries) => entries.get(segment)?.clone(),
            FieldWrite::Value(Value::Map(ref m)) => {
                FieldWrite::Value(m.get(segment)?.clone())
            },
            _ => return None,
        };
    }
    Some(current)
}

fn transform_rank(t: &Transform) -> u8 {
    match t {
        Transform::Delete => 0,
        Transform::ServerTimestamp => 1,
        Transform::Increment(_) => 2,
        Transform::ArrayUnion(_) => 3,
        Transform::ArrayRemove(_) => 4,
        Transform::Vector(_) => 5,
    }
}

/// Evaluate registered transforms against the staged post-image, in the
/// fixed kind order: serverTimestamp, increment, arrayUnion, arrayRemove,
/// vector.
fn apply_transforms(
    post: &mut MapValue,
    mut transforms: Vec<(FieldPath, Transform)>,
    commit_ts: Timestamp,
) -> anyhow::Result<()> {
    transforms.sort_by_key(|(_, t)| transform_rank(t));
    for (path, transform) in transforms {
        match transform {
            Transform::Delete => {
                post.delete_path(&path);
            },
            Transform::ServerTimestamp => {
                post.set_path(&path, Value::Timestamp(commit_ts));
            },
            Transform::Increment(operand) => {
                let base = post.get_path(&path).cloned();
                post.set_path(&path, increment(base, &operand)?);
            },
            Transform::ArrayUnion(elements) => {
                let mut array = match post.get_path(&path) {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => vec![],
                };
                for element in elements {
                    if !array.iter().any(|existing| canonical_eq(existing, &element)) {
                        array.push(element);
                    }
                }
                post.set_path(&path, Value::Array(array));
            },
            Transform::ArrayRemove(elements) => {
                let mut array = match post.get_path(&path) {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => vec![],
                };
                array.retain(|existing| {
                    !elements.iter().any(|element| canonical_eq(existing, element))
                });
                post.set_path(&path, Value::Array(array));
            },
            Transform::Vector(components) => {
                post.set_path(&path, Value::Vector(components));
            },
        }
    }
    Ok(())
}

/// Numeric add with the integer-preservation rule: missing or non-numeric
/// bases count as zero, int + int stays int (saturating), any float
/// promotes the result to float.
fn increment(base: Option<Value>, operand: &Value) -> anyhow::Result<Value> {
    let base = match base {
        Some(v @ (Value::Int64(_) | Value::Float64(_))) => v,
        _ => Value::Int64(0),
    };
    let result = match (base, operand) {
        (Value::Int64(a), Value::Int64(b)) => Value::Int64(a.saturating_add(*b)),
        (Value::Int64(a), Value::Float64(b)) => Value::Float64(a as f64 + b),
        (Value::Float64(a), Value::Int64(b)) => Value::Float64(a + *b as f64),
        (Value::Float64(a), Value::Float64(b)) => Value::Float64(a + b),
        _ => anyhow::bail!(ErrorMetadata::internal("non-numeric increment operands")),
    };
    Ok(result)
}
