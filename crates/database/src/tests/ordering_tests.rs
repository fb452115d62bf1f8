//! Cross-type ordering through the full query path.

use common::query::{
    OrderBy,
    Query,
};
use pretty_assertions::assert_eq;
use value::{
    Reference,
    Value,
};

use super::{
    collection_query,
    ids,
    new_db,
    seed_values,
};

fn reference(id: &str) -> Value {
    Value::Reference(Reference::new(
        "default-project",
        "(default)",
        format!("refs/{id}").parse().unwrap(),
    ))
}

fn special_values() -> Vec<Value> {
    vec![
        Value::Null,
        Value::Float64(f64::NAN),
        Value::Int64(0),
        Value::Int64(1),
        Value::Bytes(vec![0x61]),
        Value::Bytes(vec![0x62]),
        reference("a"),
        reference("z"),
    ]
}

#[tokio::test]
async fn test_ordering_of_special_values() {
    let db = new_db();
    // Seed in shuffled order so the sort does the work.
    let mut shuffled = special_values();
    shuffled.reverse();
    shuffled.swap(0, 3);
    seed_values(&db, "c", shuffled.clone()).await;

    let mut q = collection_query("c");
    q.order_by.push(OrderBy::asc("v".parse().unwrap()));
    let result = db.run_query(q).await.unwrap();
    let got: Vec<Value> = result
        .docs
        .iter()
        .map(|d| d.get(&"v".parse().unwrap()).unwrap().clone())
        .collect();
    let expected = special_values();
    assert_eq!(got.len(), expected.len());
    for (g, e) in got.iter().zip(&expected) {
        assert!(
            value::canonical_eq(g, e),
            "expected {e}, got {g} in {got:?}"
        );
    }

    let mut q = collection_query("c");
    q.order_by.push(OrderBy::desc("v".parse().unwrap()));
    let result = db.run_query(q).await.unwrap();
    let got_desc: Vec<Value> = result
        .docs
        .iter()
        .map(|d| d.get(&"v".parse().unwrap()).unwrap().clone())
        .collect();
    for (g, e) in got_desc.iter().zip(expected.iter().rev()) {
        assert!(value::canonical_eq(g, e), "desc expected {e}, got {g}");
    }
}

#[tokio::test]
async fn test_missing_field_sorts_last_ascending() {
    let db = new_db();
    super::set(&db, "c/with", value::fields!("v" => 1i64)).await;
    super::set(&db, "c/without", value::fields!("other" => 1i64)).await;

    let mut q = collection_query("c");
    q.order_by.push(OrderBy::asc("v".parse().unwrap()));
    assert_eq!(ids(&db.run_query(q).await.unwrap()), vec!["with", "without"]);

    let mut q = collection_query("c");
    q.order_by.push(OrderBy::desc("v".parse().unwrap()));
    assert_eq!(ids(&db.run_query(q).await.unwrap()), vec!["without", "with"]);
}

#[tokio::test]
async fn test_default_order_is_by_name() {
    let db = new_db();
    super::set(&db, "c/b", value::fields!("v" => 2i64)).await;
    super::set(&db, "c/a", value::fields!("v" => 1i64)).await;
    let result = db.run_query(Query::collection(None, "c".parse().unwrap())).await.unwrap();
    assert_eq!(ids(&result), vec!["a", "b"]);
}

#[tokio::test]
async fn test_stream_query_yields_rows_in_order() {
    use futures::StreamExt;

    let db = new_db();
    super::set(&db, "c/b", value::fields!("v" => 2i64)).await;
    super::set(&db, "c/a", value::fields!("v" => 1i64)).await;
    let mut stream = db.stream_query(collection_query("c")).await.unwrap();
    let mut seen = Vec::new();
    while let Some(doc) = stream.next().await {
        seen.push(doc.id().to_owned());
    }
    assert_eq!(seen, vec!["a", "b"]);
}

#[tokio::test]
async fn test_collection_group_query() {
    let db = new_db();
    super::set(&db, "posts/p0", value::fields!("v" => 1i64)).await;
    super::set(&db, "users/u1/posts/p1", value::fields!("v" => 2i64)).await;
    super::set(&db, "users/u1/other/o1", value::fields!("v" => 3i64)).await;

    let q = Query::collection_group("posts".parse().unwrap());
    let result = db.run_query(q).await.unwrap();
    assert_eq!(ids(&result), vec!["p0", "p1"]);
}
