//! The query executor.
//!
//! Execution is a straight pipeline over a tree scan — there is no index
//! selection. Stages run in the fixed order: scan, filter, sort,
//! cursor-filter, offset/limit, find-nearest, project.

mod aggregate;
mod filter;
mod nearest;
mod order;

use std::collections::BTreeMap;

use common::{
    document::Document,
    query::{
        Aggregate,
        Query,
    },
    types::CommitVersion,
};
use value::{
    FieldPath,
    MapValue,
    Timestamp,
    Value,
};

use crate::tree::DocumentTree;

/// Rows plus the read time they were evaluated at.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub docs: Vec<Document>,
    pub read_time: Timestamp,
}

/// Aggregate values keyed by alias, plus the read time.
#[derive(Clone, Debug)]
pub struct AggregateResult {
    pub values: BTreeMap<String, Value>,
    pub read_time: Timestamp,
}

/// Execute a normalized query against the tree at `version`.
pub fn execute_query(
    tree: &DocumentTree,
    version: CommitVersion,
    read_time: Timestamp,
    query: &Query,
) -> anyhow::Result<QueryResult> {
    let mut docs = scan(tree, version, query);

    if let Some(ref filter) = query.filter {
        docs.retain(|doc| filter::matches(filter, doc));
    }

    docs.sort_by(|a, b| order::compare_docs(&query.order_by, a, b));

    if let Some(ref cursor) = query.start_at {
        docs.retain(|doc| {
            order::after_start(order::compare_to_cursor(&query.order_by, doc, cursor), cursor)
        });
    }
    if let Some(ref cursor) = query.end_at {
        docs.retain(|doc| {
            order::before_end(order::compare_to_cursor(&query.order_by, doc, cursor), cursor)
        });
    }

    let offset = query.offset as usize;
    if offset > 0 {
        docs = docs.split_off(offset.min(docs.len()));
    }
    if let Some(limit) = query.limit {
        docs.truncate(limit as usize);
    }

    if let Some(ref nearest) = query.find_nearest {
        docs = nearest::apply_find_nearest(nearest, docs);
    }

    if let Some(ref select) = query.select {
        docs = docs.into_iter().map(|doc| project(doc, select)).collect();
    }

    Ok(QueryResult { docs, read_time })
}

/// Execute the base query, then fold the requested aggregates over its rows.
pub fn execute_aggregate(
    tree: &DocumentTree,
    version: CommitVersion,
    read_time: Timestamp,
    query: &Query,
    aggregates: &[Aggregate],
) -> anyhow::Result<AggregateResult> {
    let result = execute_query(tree, version, read_time, query)?;
    let values = aggregate::compute_aggregates(aggregates, &result.docs);
    Ok(AggregateResult {
        values,
        read_time: result.read_time,
    })
}

fn scan(tree: &DocumentTree, version: CommitVersion, query: &Query) -> Vec<Document> {
    match (&query.collection_id, query.all_descendants) {
        (Some(collection_id), true) => {
            let mut docs = tree.scan_collection_group(collection_id.as_str(), version);
            // A parented collection-group scan keeps only descendants.
            if let Some(ref parent) = query.parent {
                docs.retain(|doc| parent.is_ancestor_of(doc.path()));
            }
            docs
        },
        (Some(collection_id), false) => {
            tree.scan_collection(query.parent.as_ref(), collection_id.as_str(), version)
        },
        (None, _) => vec![],
    }
}

/// Keep only the selected field paths. An empty selection projects to
/// id-only rows.
fn project(doc: Document, select: &[FieldPath]) -> Document {
    let (path, data, create_time, update_time) = (
        doc.path().clone(),
        doc.data().clone(),
        doc.create_time(),
        doc.update_time(),
    );
    let mut projected = MapValue::empty();
    for field in select {
        if let Some(v) = data.get_path(field) {
            projected.set_path(field, v.clone());
        }
    }
    Document::new(path, projected, create_time, update_time)
}

#[cfg(test)]
mod tests {
    use common::query::{
        Cursor,
        Direction,
        FieldOp,
        Filter,
        OrderBy,
    };
    use pretty_assertions::assert_eq;
    use value::fields;

    use super::*;
    use crate::tree::DocVersion;

    fn seeded_tree() -> DocumentTree {
        let mut tree = DocumentTree::new();
        for (id, n) in [("a", 3i64), ("b", 1), ("c", 2)] {
            tree.apply_version(
                &format!("nums/{id}").parse().unwrap(),
                DocVersion {
                    data: Some(fields!("n" => n)),
                    create_time: Timestamp::from_unix_micros(1),
                    update_time: Timestamp::from_unix_micros(1),
                    committed_at: CommitVersion(1),
                },
            );
        }
        tree
    }

    fn run(tree: &DocumentTree, query: Query) -> Vec<String> {
        let query = query.normalize().unwrap();
        execute_query(
            tree,
            CommitVersion(1),
            Timestamp::from_unix_micros(1),
            &query,
        )
        .unwrap()
        .docs
        .iter()
        .map(|d| d.id().to_owned())
        .collect()
    }

    #[test]
    fn test_order_and_limit() {
        let tree = seeded_tree();
        let mut q = Query::collection(None, "nums".parse().unwrap());
        q.order_by.push(OrderBy::asc("n".parse().unwrap()));
        q.limit = Some(2);
        assert_eq!(run(&tree, q), vec!["b", "c"]);
    }

    #[test]
    fn test_limit_zero_returns_no_rows() {
        let tree = seeded_tree();
        let mut q = Query::collection(None, "nums".parse().unwrap());
        q.limit = Some(0);
        let result = execute_query(
            &tree,
            CommitVersion(1),
            Timestamp::from_unix_micros(9),
            &q.normalize().unwrap(),
        )
        .unwrap();
        assert!(result.docs.is_empty());
        assert_eq!(result.read_time, Timestamp::from_unix_micros(9));
    }

    #[test]
    fn test_filter_offset() {
        let tree = seeded_tree();
        let mut q = Query::collection(None, "nums".parse().unwrap());
        q.filter = Some(Filter::Field {
            field: "n".parse().unwrap(),
            op: FieldOp::Ge,
            value: Value::Int64(2),
        });
        q.offset = 1;
        assert_eq!(run(&tree, q), vec!["a"]);
    }

    #[test]
    fn test_cursor_over_name_tiebreaker() {
        let tree = seeded_tree();
        let mut q = Query::collection(None, "nums".parse().unwrap());
        q.order_by.push(OrderBy {
            field: "__name__".parse().unwrap(),
            direction: Direction::Ascending,
        });
        q.start_at = Some(Cursor {
            values: vec![Value::from("nums/a")],
            before: false,
        });
        assert_eq!(run(&tree, q), vec!["b", "c"]);
    }

    #[test]
    fn test_projection() {
        let mut tree = DocumentTree::new();
        tree.apply_version(
            &"c/d".parse().unwrap(),
            DocVersion {
                data: Some(fields!("keep" => 1i64, "drop" => 2i64)),
                create_time: Timestamp::from_unix_micros(1),
                update_time: Timestamp::from_unix_micros(1),
                committed_at: CommitVersion(1),
            },
        );
        let mut q = Query::collection(None, "c".parse().unwrap());
        q.select = Some(vec!["keep".parse().unwrap()]);
        let q = q.normalize().unwrap();
        let result = execute_query(
            &tree,
            CommitVersion(1),
            Timestamp::from_unix_micros(1),
            &q,
        )
        .unwrap();
        assert_eq!(result.docs[0].data(), &fields!("keep" => 1i64));

        // Empty select keeps ids only.
        let mut q = Query::collection(None, "c".parse().unwrap());
        q.select = Some(vec![]);
        let q = q.normalize().unwrap();
        let result = execute_query(
            &tree,
            CommitVersion(1),
            Timestamp::from_unix_micros(1),
            &q,
        )
        .unwrap();
        assert!(result.docs[0].data().is_empty());
    }
}
