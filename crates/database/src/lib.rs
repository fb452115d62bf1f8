//! The storage, query, transaction, and change-stream engine.
//!
//! An instance holds a hierarchical tree of versioned documents. All
//! mutation serializes through a single committer task; reads, query scans,
//! and listener diffs evaluate against immutable version snapshots. Commits
//! append to a write log that feeds the listener bus and the epoch-stamped
//! change broadcast consumed by trigger dispatchers.

mod committer;
mod pipeline;
mod query;
mod stats;
mod subscription;
mod transaction;
mod tree;
mod write_log;

mod database;

#[cfg(test)]
mod tests;

pub use crate::{
    committer::CommitResponse,
    database::{
        Database,
        StorePool,
    },
    query::{
        AggregateResult,
        QueryResult,
    },
    stats::StatsSnapshot,
    subscription::{
        DocumentListener,
        DocumentSnapshot,
        QueryChange,
        QueryListener,
        QuerySnapshot,
    },
    transaction::{
        Transaction,
        TransactionMode,
        TransactionOptions,
    },
    tree::{
        DocEntry,
        DocumentTree,
        DocVersion,
        TreeCounts,
    },
    write_log::{
        CommitRecord,
        WriteLog,
    },
};
