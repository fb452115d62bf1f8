//! Transactions: snapshot reads, staged writes, and commit-time validation.
//!
//! A transaction pins its `read_version` at creation and every read binds to
//! it. Reads are recorded as a flat list of `(path, observed update time)`
//! pairs; at commit the committer re-checks each observation against the
//! current state and aborts the transaction on any mismatch. The manager
//! itself never retries — [`crate::Database::run_transaction`] owns the
//! retry loop.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering as AtomicOrdering,
        },
        Arc,
    },
};

use common::{
    document::Document,
    query::{
        Aggregate,
        Query,
    },
    types::CommitVersion,
    write::{
        Batch,
        FieldWrite,
        Merge,
        Operation,
        Precondition,
        WriteFields,
        WriteResult,
    },
};
use errors::ErrorMetadata;
use parking_lot::{
    Mutex,
    RwLock,
};
use value::{
    DocumentPath,
    FieldPath,
    Timestamp,
};

use crate::{
    committer::{
        CommitterClient,
        StoreState,
    },
    query::{
        execute_aggregate,
        execute_query,
        AggregateResult,
        QueryResult,
    },
    stats::StatsRegistry,
};

/// Tracks every live transaction's snapshot version so retention never
/// prunes a version an active reader might still need.
pub struct TxRegistry {
    next_id: AtomicU64,
    active: Mutex<BTreeMap<u64, CommitVersion>>,
}

impl TxRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, read_version: CommitVersion) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.active.lock().insert(id, read_version);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.active.lock().remove(&id);
    }

    pub fn min_read_version(&self) -> Option<CommitVersion> {
        self.active.lock().values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug)]
pub struct TransactionOptions {
    pub mode: TransactionMode,
    /// Retry budget for [`crate::Database::run_transaction`].
    pub max_attempts: u32,
    /// Pin a read-only transaction at an historical version.
    pub read_version: Option<CommitVersion>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            mode: TransactionMode::ReadWrite,
            max_attempts: 5,
            read_version: None,
        }
    }
}

/// A single-caller transaction handle. Dropping without committing aborts.
pub struct Transaction {
    id: u64,
    mode: TransactionMode,
    read_version: CommitVersion,
    read_ts: Timestamp,
    state: Arc<RwLock<StoreState>>,
    committer: CommitterClient,
    stats: Arc<StatsRegistry>,
    registry: Arc<TxRegistry>,
    reads: Vec<(DocumentPath, Option<Timestamp>)>,
    writes: Vec<Operation>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(
        options: &TransactionOptions,
        state: Arc<RwLock<StoreState>>,
        committer: CommitterClient,
        stats: Arc<StatsRegistry>,
        registry: Arc<TxRegistry>,
    ) -> anyhow::Result<Self> {
        let (read_version, read_ts) = {
            let state = state.read();
            let version = match options.read_version {
                Some(version) => {
                    anyhow::ensure!(
                        options.mode == TransactionMode::ReadOnly,
                        ErrorMetadata::invalid_argument(
                            "InvalidReadTime",
                            "explicit read versions require a read-only transaction",
                        )
                    );
                    anyhow::ensure!(
                        version <= state.commit_version,
                        ErrorMetadata::invalid_argument(
                            "InvalidReadTime",
                            format!(
                                "read version {version} is ahead of the instance ({})",
                                state.commit_version
                            ),
                        )
                    );
                    version
                },
                None => state.commit_version,
            };
            (version, state.last_commit_ts)
        };
        let id = registry.register(read_version);
        Ok(Self {
            id,
            mode: options.mode,
            read_version,
            read_ts,
            state,
            committer,
            stats,
            registry,
            reads: Vec::new(),
            writes: Vec::new(),
            finished: false,
        })
    }

    pub fn read_version(&self) -> CommitVersion {
        self.read_version
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Point read at the transaction's snapshot. The observation is recorded
    /// for commit-time validation.
    pub async fn get(&mut self, path: &DocumentPath) -> anyhow::Result<Option<Document>> {
        let doc = {
            let state = self.state.read();
            state.tree.read_document(path, self.read_version)
        };
        self.stats.record_read(doc.is_some());
        self.observe(path.clone(), doc.as_ref().map(|d| d.update_time()));
        Ok(doc)
    }

    /// Run a query at the transaction's snapshot, recording every returned
    /// row in the read set.
    pub async fn query(&mut self, query: Query) -> anyhow::Result<QueryResult> {
        let query = query.normalize()?;
        let result = {
            let state = self.state.read();
            execute_query(&state.tree, self.read_version, self.read_ts, &query)?
        };
        for doc in &result.docs {
            self.observe(doc.path().clone(), Some(doc.update_time()));
        }
        Ok(result)
    }

    pub async fn aggregate(
        &mut self,
        query: Query,
        aggregates: &[Aggregate],
    ) -> anyhow::Result<AggregateResult> {
        let query = query.normalize()?;
        let state = self.state.read();
        execute_aggregate(
            &state.tree,
            self.read_version,
            self.read_ts,
            &query,
            aggregates,
        )
    }

    fn observe(&mut self, path: DocumentPath, update_time: Option<Timestamp>) {
        // A transaction rereading the same document keeps the first
        // observation; it is the one commit validation must hold.
        if !self.reads.iter().any(|(p, _)| *p == path) {
            self.reads.push((path, update_time));
        }
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.mode == TransactionMode::ReadWrite,
            ErrorMetadata::invalid_argument(
                "ReadOnlyTransaction",
                "read-only transactions cannot stage writes",
            )
        );
        Ok(())
    }

    pub fn create(&mut self, path: DocumentPath, data: WriteFields) -> anyhow::Result<()> {
        self.check_writable()?;
        self.writes.push(Operation::create(path, data)?);
        Ok(())
    }

    pub fn set(&mut self, path: DocumentPath, data: WriteFields) -> anyhow::Result<()> {
        self.check_writable()?;
        self.writes.push(Operation::set(path, data)?);
        Ok(())
    }

    pub fn set_merge(
        &mut self,
        path: DocumentPath,
        data: WriteFields,
        merge: Merge,
    ) -> anyhow::Result<()> {
        self.check_writable()?;
        self.writes.push(Operation::set_merge(path, data, merge)?);
        Ok(())
    }

    pub fn update(
        &mut self,
        path: DocumentPath,
        data: Vec<(FieldPath, FieldWrite)>,
        precondition: Option<Precondition>,
    ) -> anyhow::Result<()> {
        self.check_writable()?;
        self.writes.push(Operation::update(path, data, precondition)?);
        Ok(())
    }

    pub fn delete(&mut self, path: DocumentPath, precondition: Option<Precondition>) -> anyhow::Result<()> {
        self.check_writable()?;
        self.writes.push(Operation::delete(path, precondition));
        Ok(())
    }

    /// Validate the read set and apply the staged writes atomically. On
    /// `ABORTED`, the caller may begin a fresh transaction and retry.
    pub async fn commit(mut self) -> anyhow::Result<Vec<WriteResult>> {
        self.finished = true;
        self.registry.unregister(self.id);
        if self.writes.is_empty() {
            return Ok(vec![]);
        }
        let batch = Batch::new(std::mem::take(&mut self.writes));
        let read_set = std::mem::take(&mut self.reads);
        let response = self.committer.commit(batch, read_set).await?;
        Ok(response.results)
    }

    /// Abort without applying anything. Idempotent with drop.
    pub fn rollback(mut self) {
        self.finished = true;
        self.registry.unregister(self.id);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.unregister(self.id);
        }
    }
}
