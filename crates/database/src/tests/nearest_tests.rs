//! Find-nearest through the database surface.

use common::{
    query::{
        DistanceMeasure,
        FieldOp,
        Filter,
        FindNearest,
    },
    write::{
        FieldWrite,
        Operation,
        Transform,
        WriteFields,
    },
};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use value::{
    fields,
    Value,
};

use super::{
    collection_query,
    ids,
    new_db,
    path,
    set,
};

async fn seed_vectors(db: &crate::Database) {
    for (id, components, tag) in [
        ("a", vec![1.0, 0.0], 1i64),
        ("b", vec![0.0, 1.0], 1),
        ("c", vec![3.0, 4.0], 2),
    ] {
        set(
            db,
            &format!("embeds/{id}"),
            fields!("v" => Value::Vector(components), "tag" => tag),
        )
        .await;
    }
}

fn nearest(measure: DistanceMeasure, limit: usize) -> FindNearest {
    FindNearest {
        vector_field: "v".parse().unwrap(),
        query_vector: vec![1.0, 0.0],
        limit,
        measure,
        distance_threshold: None,
        distance_result_field: None,
    }
}

#[tokio::test]
async fn test_nearest_top_k() {
    let db = new_db();
    seed_vectors(&db).await;
    let mut q = collection_query("embeds");
    q.find_nearest = Some(nearest(DistanceMeasure::Euclidean, 2));
    let result = db.run_query(q).await.unwrap();
    assert_eq!(ids(&result), vec!["a", "b"]);
}

#[tokio::test]
async fn test_nearest_composes_with_filters() {
    let db = new_db();
    seed_vectors(&db).await;
    let mut q = collection_query("embeds");
    q.filter = Some(Filter::Field {
        field: "tag".parse().unwrap(),
        op: FieldOp::Eq,
        value: Value::Int64(1),
    });
    q.find_nearest = Some(nearest(DistanceMeasure::Euclidean, 10));
    let result = db.run_query(q).await.unwrap();
    assert_eq!(ids(&result), vec!["a", "b"]);
}

#[tokio::test]
async fn test_nearest_dimension_mismatch_is_empty() {
    let db = new_db();
    seed_vectors(&db).await;
    let mut q = collection_query("embeds");
    let mut spec = nearest(DistanceMeasure::Euclidean, 10);
    spec.query_vector = vec![1.0, 0.0, 0.0];
    q.find_nearest = Some(spec);
    let result = db.run_query(q).await.unwrap();
    assert!(result.docs.is_empty());
}

#[tokio::test]
async fn test_vector_transform_materializes_vector() {
    let db = new_db();
    let data: WriteFields = btreemap! {
        "v".parse().unwrap() => FieldWrite::Transform(Transform::Vector(vec![1.0, 2.0])),
    };
    db.apply(Operation::set(path("embeds/t"), data).unwrap())
        .await
        .unwrap();
    let doc = db.get(&path("embeds/t")).await.unwrap().unwrap();
    assert_eq!(
        doc.get(&"v".parse().unwrap()),
        Some(&Value::Vector(vec![1.0, 2.0]))
    );
}

#[tokio::test]
async fn test_distance_result_field() {
    let db = new_db();
    seed_vectors(&db).await;
    let mut q = collection_query("embeds");
    let mut spec = nearest(DistanceMeasure::DotProduct, 1);
    spec.distance_result_field = Some("score".parse().unwrap());
    q.find_nearest = Some(spec);
    let result = db.run_query(q).await.unwrap();
    assert_eq!(ids(&result), vec!["c"]);
    assert_eq!(
        result.docs[0].get(&"score".parse().unwrap()),
        Some(&Value::Float64(3.0))
    );
}
