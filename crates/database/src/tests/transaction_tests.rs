//! Transaction semantics: snapshots, conflicts, retries, retention.

use std::sync::{
    atomic::{
        AtomicU32,
        Ordering as AtomicOrdering,
    },
    Arc,
};

use common::write::write_fields_of;
use errors::ErrorMetadataAnyhowExt;
use futures::FutureExt;
use must_let::must_let;
use value::{
    fields,
    Value,
};

use super::{
    new_db,
    path,
    set,
};
use crate::{
    TransactionMode,
    TransactionOptions,
};

fn read_only() -> TransactionOptions {
    TransactionOptions {
        mode: TransactionMode::ReadOnly,
        ..TransactionOptions::default()
    }
}

#[tokio::test]
async fn test_reads_bind_to_snapshot() {
    let db = new_db();
    set(&db, "users/alice", fields!("n" => 1i64)).await;

    let mut tx = db.begin_transaction(read_only()).await.unwrap();
    set(&db, "users/alice", fields!("n" => 2i64)).await;

    // The transaction still observes the snapshot it began at.
    let doc = tx.get(&path("users/alice")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(1)) = doc.get(&"n".parse().unwrap()));
    tx.rollback();

    let doc = db.get(&path("users/alice")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(2)) = doc.get(&"n".parse().unwrap()));
}

#[tokio::test]
async fn test_explicit_read_version() {
    let db = new_db();
    set(&db, "users/alice", fields!("n" => 1i64)).await;
    let pinned = db.commit_version();
    set(&db, "users/alice", fields!("n" => 2i64)).await;

    let options = TransactionOptions {
        mode: TransactionMode::ReadOnly,
        read_version: Some(pinned),
        ..TransactionOptions::default()
    };
    let mut tx = db.begin_transaction(options).await.unwrap();
    let doc = tx.get(&path("users/alice")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(1)) = doc.get(&"n".parse().unwrap()));
    tx.rollback();
}

#[tokio::test]
async fn test_read_only_rejects_writes() {
    let db = new_db();
    let mut tx = db.begin_transaction(read_only()).await.unwrap();
    let err = tx
        .set(path("users/alice"), write_fields_of(fields!("n" => 1i64)))
        .unwrap_err();
    assert!(err.is_invalid_argument());
    tx.rollback();
}

#[tokio::test]
async fn test_concurrent_conflict_exactly_one_commits() {
    let db = new_db();
    set(&db, "counters/d", fields!("n" => 0i64)).await;
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let attempt = |delta: i64| {
        let db = db.clone();
        let barrier = barrier.clone();
        async move {
            let mut tx = db
                .begin_transaction(TransactionOptions::default())
                .await?;
            let doc = tx.get(&path("counters/d")).await?.unwrap();
            must_let!(let Some(&Value::Int64(current)) = doc.get(&"n".parse().unwrap()));
            barrier.wait().await;
            tx.set(
                path("counters/d"),
                write_fields_of(fields!("n" => current + delta)),
            )?;
            tx.commit().await?;
            anyhow::Ok(delta)
        }
    };

    let (a, b) = tokio::join!(attempt(10), attempt(100));
    let committed: Vec<i64> = [&a, &b].into_iter().flatten().copied().collect();
    let aborted: Vec<&anyhow::Error> =
        [&a, &b].into_iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(committed.len(), 1, "exactly one transaction must commit");
    assert_eq!(aborted.len(), 1);
    assert!(aborted[0].is_aborted(), "loser must abort, got {}", aborted[0]);

    let doc = db.get(&path("counters/d")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(n)) = doc.get(&"n".parse().unwrap()));
    assert_eq!(n, committed[0]);
}

#[tokio::test]
async fn test_runner_retries_until_success() {
    let db = new_db();
    set(&db, "counters/d", fields!("n" => 0i64)).await;
    let injections = Arc::new(AtomicU32::new(2));

    let result = db
        .run_transaction(TransactionOptions::default(), |tx| {
            let db = db.clone();
            let injections = injections.clone();
            async move {
                let doc = tx.get(&path("counters/d")).await?.unwrap();
                must_let!(let Some(&Value::Int64(current)) = doc.get(&"n".parse().unwrap()));
                // Interfere with the first two attempts by committing a
                // conflicting write between read and commit.
                if injections.fetch_sub(1, AtomicOrdering::SeqCst) > 0 {
                    set(&db, "counters/d", fields!("n" => current + 1000)).await;
                }
                tx.set(
                    path("counters/d"),
                    write_fields_of(fields!("n" => current + 1)),
                )?;
                anyhow::Ok(current + 1)
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(result, 2001);
}

#[tokio::test]
async fn test_runner_exhausts_max_attempts() {
    let db = new_db();
    set(&db, "counters/d", fields!("n" => 0i64)).await;
    let options = TransactionOptions {
        max_attempts: 2,
        ..TransactionOptions::default()
    };
    let attempts = Arc::new(AtomicU32::new(0));
    let err = db
        .run_transaction(options, |tx| {
            let db = db.clone();
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, AtomicOrdering::SeqCst) as i64;
                let _ = tx.get(&path("counters/d")).await?;
                // Always conflict with a value that changes per attempt.
                set(&db, "counters/d", fields!("n" => attempt + 10)).await;
                tx.set(path("counters/d"), write_fields_of(fields!("n" => 8i64)))?;
                anyhow::Ok(())
            }
            .boxed()
        })
        .await
        .unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(attempts.load(AtomicOrdering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_aborted_errors_propagate_immediately() {
    let db = new_db();
    let attempts = Arc::new(AtomicU32::new(0));
    let err = db
        .run_transaction(TransactionOptions::default(), |tx| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, AtomicOrdering::SeqCst);
                // NOT_FOUND from an update of a missing document.
                tx.update(
                    path("users/missing"),
                    vec![(
                        "n".parse().unwrap(),
                        common::write::FieldWrite::Value(Value::Int64(1)),
                    )],
                    None,
                )?;
                anyhow::Ok(())
            }
            .boxed()
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(attempts.load(AtomicOrdering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_results_join_the_read_set() {
    let db = new_db();
    set(&db, "users/alice", fields!("n" => 1i64)).await;

    let mut tx = db
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    let result = tx.query(super::collection_query("users")).await.unwrap();
    assert_eq!(result.docs.len(), 1);

    // Concurrent write to a document the query returned.
    set(&db, "users/alice", fields!("n" => 2i64)).await;
    tx.set(path("users/other"), write_fields_of(fields!("x" => 1i64)))
        .unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(err.is_aborted());
}

#[tokio::test]
async fn test_rollback_releases_without_effects() {
    let db = new_db();
    let mut tx = db
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    tx.set(path("users/alice"), write_fields_of(fields!("n" => 1i64)))
        .unwrap();
    tx.rollback();
    assert!(db.get(&path("users/alice")).await.unwrap().is_none());
    assert_eq!(db.active_transactions(), 0);
}

#[tokio::test]
async fn test_dropped_transaction_unregisters() {
    let db = new_db();
    {
        let _tx = db
            .begin_transaction(TransactionOptions::default())
            .await
            .unwrap();
        assert_eq!(db.active_transactions(), 1);
    }
    assert_eq!(db.active_transactions(), 0);
}

#[tokio::test]
async fn test_active_snapshot_survives_retention() {
    let db = new_db();
    set(&db, "users/alice", fields!("n" => 1i64)).await;
    let mut tx = db.begin_transaction(read_only()).await.unwrap();
    // Later commits prune aggressively, but the registered snapshot holds
    // the old version alive.
    for i in 0..10 {
        set(&db, "users/alice", fields!("n" => (i + 2) as i64)).await;
    }
    let doc = tx.get(&path("users/alice")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(1)) = doc.get(&"n".parse().unwrap()));
    tx.rollback();
}

#[tokio::test]
async fn test_blind_writes_do_not_conflict() {
    let db = new_db();
    set(&db, "users/alice", fields!("n" => 1i64)).await;
    let mut tx = db
        .begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    // No reads registered; concurrent writes cannot abort the commit.
    set(&db, "users/alice", fields!("n" => 5i64)).await;
    tx.set(path("users/alice"), write_fields_of(fields!("n" => 9i64)))
        .unwrap();
    tx.commit().await.unwrap();
    let doc = db.get(&path("users/alice")).await.unwrap().unwrap();
    must_let!(let Some(&Value::Int64(9)) = doc.get(&"n".parse().unwrap()));
}
