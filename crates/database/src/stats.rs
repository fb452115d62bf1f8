//! Per-instance operation counters, published as frozen snapshots.

use common::types::CommitVersion;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::tree::TreeCounts;

/// A frozen view of the instance's counters. Watchers receive a complete
/// snapshot on every change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub database_id: String,
    pub commit_version: u64,
    pub documents_total: u64,
    pub documents_existent: u64,
    pub collections_total: u64,
    pub writes: u64,
    pub reads: u64,
    pub deletes: u64,
    pub noop_writes: u64,
    pub noop_reads: u64,
    pub noop_deletes: u64,
}

#[derive(Default)]
struct Counters {
    writes: u64,
    reads: u64,
    deletes: u64,
    noop_writes: u64,
    noop_reads: u64,
    noop_deletes: u64,
    tree: TreeCounts,
    commit_version: u64,
}

pub struct StatsRegistry {
    database_id: String,
    counters: Mutex<Counters>,
    tx: watch::Sender<StatsSnapshot>,
}

impl StatsRegistry {
    pub fn new(database_id: String) -> Self {
        let initial = StatsSnapshot {
            database_id: database_id.clone(),
            ..Default::default()
        };
        let (tx, _) = watch::channel(initial);
        Self {
            database_id,
            counters: Mutex::new(Counters::default()),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.tx.borrow().clone()
    }

    pub fn record_commit(
        &self,
        version: CommitVersion,
        writes: u64,
        deletes: u64,
        noop_writes: u64,
        noop_deletes: u64,
        tree: TreeCounts,
    ) {
        let mut counters = self.counters.lock();
        counters.writes += writes;
        counters.deletes += deletes;
        counters.noop_writes += noop_writes;
        counters.noop_deletes += noop_deletes;
        counters.tree = tree;
        counters.commit_version = version.0;
        let snapshot = self.freeze(&counters);
        drop(counters);
        self.tx.send_replace(snapshot);
    }

    pub fn record_read(&self, found: bool) {
        let mut counters = self.counters.lock();
        if found {
            counters.reads += 1;
        } else {
            counters.noop_reads += 1;
        }
        let snapshot = self.freeze(&counters);
        drop(counters);
        self.tx.send_replace(snapshot);
    }

    pub fn reset(&self, version: CommitVersion) {
        let mut counters = self.counters.lock();
        *counters = Counters {
            commit_version: version.0,
            ..Counters::default()
        };
        let snapshot = self.freeze(&counters);
        drop(counters);
        self.tx.send_replace(snapshot);
    }

    fn freeze(&self, counters: &Counters) -> StatsSnapshot {
        StatsSnapshot {
            database_id: self.database_id.clone(),
            commit_version: counters.commit_version,
            documents_total: counters.tree.documents_total,
            documents_existent: counters.tree.documents_existent,
            collections_total: counters.tree.collections_total,
            writes: counters.writes,
            reads: counters.reads,
            deletes: counters.deletes,
            noop_writes: counters.noop_writes,
            noop_reads: counters.noop_reads,
            noop_deletes: counters.noop_deletes,
        }
    }
}
