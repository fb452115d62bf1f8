//! Engine-level scenario tests.

mod batch_tests;
mod nearest_tests;
mod ordering_tests;
mod transaction_tests;

use common::{
    query::Query,
    types::InstanceConfig,
    write::{
        write_fields_of,
        Operation,
        WriteResult,
    },
};
use value::{
    DocumentPath,
    MapValue,
    Value,
};

use crate::Database;

pub fn new_db() -> Database {
    Database::new(InstanceConfig::default())
}

pub fn path(s: &str) -> DocumentPath {
    s.parse().unwrap()
}

pub async fn set(db: &Database, doc: &str, data: MapValue) -> WriteResult {
    db.apply(Operation::set(path(doc), write_fields_of(data)).unwrap())
        .await
        .unwrap()
}

/// Seed `collection/d{i}` documents each holding `{ v: value }`.
pub async fn seed_values(db: &Database, collection: &str, values: Vec<Value>) {
    for (i, v) in values.into_iter().enumerate() {
        let mut data = MapValue::empty();
        data.insert("v".parse().unwrap(), v);
        set(db, &format!("{collection}/d{i}"), data).await;
    }
}

pub fn collection_query(collection: &str) -> Query {
    Query::collection(None, collection.parse().unwrap())
}

/// Shorthand for the ids of a query result, in result order.
pub fn ids(result: &crate::QueryResult) -> Vec<String> {
    result.docs.iter().map(|d| d.id().to_owned()).collect()
}
