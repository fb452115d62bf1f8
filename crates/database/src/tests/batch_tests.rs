//! Batch atomicity, preconditions, and idempotence at the engine surface.

use common::write::{
    write_fields_of,
    Batch,
    FieldWrite,
    Merge,
    Operation,
    Precondition,
    Transform,
    WriteFields,
};
use errors::{
    ErrorCode,
    ErrorMetadataAnyhowExt,
};
use maplit::btreemap;
use must_let::must_let;
use pretty_assertions::assert_eq;
use value::{
    fields,
    Value,
};

use super::{
    new_db,
    path,
    set,
};

#[tokio::test]
async fn test_failed_batch_leaves_no_trace() {
    let db = new_db();
    let version_before = db.commit_version();
    let batch = Batch::new(vec![
        Operation::set(path("users/a"), write_fields_of(fields!("v" => 1i64))).unwrap(),
        Operation::update(
            path("users/missing_b"),
            vec![("v".parse().unwrap(), FieldWrite::Value(Value::Int64(1)))],
            None,
        )
        .unwrap(),
    ]);
    let err = db.commit(batch).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    // Neither document exists and the commit version did not advance.
    assert!(db.get(&path("users/a")).await.unwrap().is_none());
    assert!(db.get(&path("users/missing_b")).await.unwrap().is_none());
    assert_eq!(db.commit_version(), version_before);
}

#[tokio::test]
async fn test_write_results_align_with_operations() {
    let db = new_db();
    let batch = Batch::new(vec![
        Operation::set(path("users/a"), write_fields_of(fields!("v" => 1i64))).unwrap(),
        Operation::delete(path("users/missing"), None),
        Operation::set(path("users/b"), write_fields_of(fields!("v" => 2i64))).unwrap(),
    ]);
    let results = db.commit(batch).await.unwrap();
    assert_eq!(results.len(), 3);
    // All operations in one batch share the commit's write time.
    assert_eq!(results[0].write_time, results[1].write_time);
    assert_eq!(results[1].write_time, results[2].write_time);

    let doc = db.get(&path("users/a")).await.unwrap().unwrap();
    assert_eq!(doc.update_time(), results[0].write_time);
}

#[tokio::test]
async fn test_commit_version_advances_by_one() {
    let db = new_db();
    let v0 = db.commit_version();
    set(&db, "users/a", fields!("v" => 1i64)).await;
    let v1 = db.commit_version();
    set(&db, "users/b", fields!("v" => 1i64)).await;
    let v2 = db.commit_version();
    assert_eq!(v1, v0.succ());
    assert_eq!(v2, v1.succ());
}

#[tokio::test]
async fn test_create_then_exists_precondition_delete() {
    let db = new_db();
    db.apply(Operation::create(path("users/a"), write_fields_of(fields!("v" => 1i64))).unwrap())
        .await
        .unwrap();

    let err = db
        .apply(
            Operation::create(path("users/a"), write_fields_of(fields!("v" => 2i64))).unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    // Delete with exists:false fails against a live document.
    let err = db
        .apply(Operation::delete(
            path("users/a"),
            Some(Precondition::Exists(false)),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    // Delete with exists:true on a missing document fails NOT_FOUND.
    let err = db
        .apply(Operation::delete(
            path("users/missing"),
            Some(Precondition::Exists(true)),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_last_update_time_precondition() {
    let db = new_db();
    let result = set(&db, "users/a", fields!("v" => 1i64)).await;

    // Matching precondition applies.
    db.apply(
        Operation::update(
            path("users/a"),
            vec![("v".parse().unwrap(), FieldWrite::Value(Value::Int64(2)))],
            Some(Precondition::UpdateTime(result.write_time)),
        )
        .unwrap(),
    )
    .await
    .unwrap();

    // The document moved on; the old timestamp is now stale.
    let err = db
        .apply(
            Operation::update(
                path("users/a"),
                vec![("v".parse().unwrap(), FieldWrite::Value(Value::Int64(3)))],
                Some(Precondition::UpdateTime(result.write_time)),
            )
            .unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn test_delete_missing_is_idempotent_noop() {
    let db = new_db();
    let first = db
        .apply(Operation::delete(path("users/ghost"), None))
        .await
        .unwrap();
    let second = db
        .apply(Operation::delete(path("users/ghost"), None))
        .await
        .unwrap();
    // Both produce write results with a timestamp.
    assert!(second.write_time > first.write_time);
    assert_eq!(db.stats().noop_deletes, 2);
}

#[tokio::test]
async fn test_delete_leaves_structural_placeholder() {
    let db = new_db();
    set(&db, "users/a", fields!("v" => 1i64)).await;
    set(&db, "users/a/posts/p", fields!("t" => "hi")).await;
    db.apply(Operation::delete(path("users/a"), None))
        .await
        .unwrap();

    // Parent reads as missing, child remains reachable.
    assert!(db.get(&path("users/a")).await.unwrap().is_none());
    assert!(db.get(&path("users/a/posts/p")).await.unwrap().is_some());
    let result = db
        .run_query(common::query::Query::collection(
            Some(path("users/a")),
            "posts".parse().unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(result.docs.len(), 1);

    // Structural placeholders never appear in query results.
    let users = db.run_query(super::collection_query("users")).await.unwrap();
    assert!(users.docs.is_empty());
}

#[tokio::test]
async fn test_set_merge_fields_on_missing_document() {
    let db = new_db();
    db.apply(
        Operation::set_merge(
            path("users/a"),
            write_fields_of(fields!("keep" => 1i64, "other" => 2i64)),
            Merge::Fields(vec!["keep".parse().unwrap()]),
        )
        .unwrap(),
    )
    .await
    .unwrap();
    let doc = db.get(&path("users/a")).await.unwrap().unwrap();
    assert_eq!(doc.data(), &fields!("keep" => 1i64));
}

#[tokio::test]
async fn test_server_timestamp_resolves_to_commit_time() {
    let db = new_db();
    let data: WriteFields = btreemap! {
        "at".parse().unwrap() => FieldWrite::Transform(Transform::ServerTimestamp),
    };
    let result = db
        .apply(Operation::set(path("logs/l"), data).unwrap())
        .await
        .unwrap();
    let doc = db.get(&path("logs/l")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Timestamp(at)) = doc.get(&"at".parse().unwrap()));
    assert_eq!(at, result.write_time);
}

#[tokio::test]
async fn test_same_document_written_twice_in_one_batch() {
    let db = new_db();
    let batch = Batch::new(vec![
        Operation::set(path("users/a"), write_fields_of(fields!("v" => 1i64))).unwrap(),
        Operation::update(
            path("users/a"),
            vec![("w".parse().unwrap(), FieldWrite::Value(Value::Int64(2)))],
            None,
        )
        .unwrap(),
    ]);
    db.commit(batch).await.unwrap();
    let doc = db.get(&path("users/a")).await.unwrap().unwrap();
    assert_eq!(doc.data(), &fields!("v" => 1i64, "w" => 2i64));
}

#[tokio::test]
async fn test_odd_field_segments_round_trip() {
    let db = new_db();
    set(
        &db,
        "odd/doc",
        fields!("with-hyphen" => 1i64, "0digit" => 2i64, "has space" => 3i64),
    )
    .await;

    // Structured path addressing.
    let structured = value::FieldPath::new(vec!["with-hyphen".parse().unwrap()]).unwrap();
    let doc = db.get(&path("odd/doc")).await.unwrap().unwrap();
    assert_eq!(doc.get(&structured), Some(&Value::Int64(1)));

    // Dotted string addressing splits literally; backticks are not quoting.
    db.apply(
        Operation::update(
            path("odd/doc"),
            vec![(
                "`q`".parse().unwrap(),
                FieldWrite::Value(Value::Int64(4)),
            )],
            None,
        )
        .unwrap(),
    )
    .await
    .unwrap();
    let doc = db.get(&path("odd/doc")).await.unwrap().unwrap();
    assert_eq!(
        doc.get(&value::FieldPath::new(vec!["`q`".parse().unwrap()]).unwrap()),
        Some(&Value::Int64(4))
    );
}
