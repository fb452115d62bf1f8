//! The commit serializer.
//!
//! All mutation flows through a single worker task draining an mpsc channel,
//! so batches admit one at a time and `commit_version` advances by exactly
//! one per successful batch. Point reads and query scans never touch this
//! path; they read versioned state under the shared lock.

use std::sync::Arc;

use common::{
    document::DocumentChange,
    types::{
        CommitVersion,
        Epoch,
    },
    write::{
        Batch,
        WriteResult,
    },
};
use errors::ErrorMetadata;
use parking_lot::RwLock;
use tokio::sync::{
    mpsc,
    oneshot,
};
use value::{
    DocumentPath,
    Timestamp,
};

use crate::{
    pipeline::apply_batch,
    stats::StatsRegistry,
    transaction::TxRegistry,
    tree::DocumentTree,
    write_log::{
        CommitRecord,
        WriteLog,
    },
};

// Large enough that a full buffer means a runaway caller, not backpressure.
const COMMITTER_BUFFER: usize = 1024;

/// The mutable heart of an instance, guarded by one RwLock. The committer
/// task is the only writer.
pub struct StoreState {
    pub tree: DocumentTree,
    pub commit_version: CommitVersion,
    pub last_commit_ts: Timestamp,
    pub epoch: Epoch,
}

impl StoreState {
    pub fn new() -> Self {
        Self {
            tree: DocumentTree::new(),
            commit_version: CommitVersion::MIN,
            last_commit_ts: Timestamp::now(),
            epoch: Epoch::default(),
        }
    }
}

/// Reads a transaction observed, re-validated at commit time. `None` means
/// the document was observed missing.
pub type ReadSet = Vec<(DocumentPath, Option<Timestamp>)>;

pub struct CommitResponse {
    pub commit_version: CommitVersion,
    pub write_time: Timestamp,
    pub results: Vec<WriteResult>,
}

enum CommitterRequest {
    Commit {
        batch: Batch,
        read_set: ReadSet,
        result: oneshot::Sender<anyhow::Result<CommitResponse>>,
    },
    Reset {
        result: oneshot::Sender<Epoch>,
    },
}

#[derive(Clone)]
pub struct CommitterClient {
    sender: mpsc::Sender<CommitterRequest>,
}

impl CommitterClient {
    /// Serialize one batch through the committer. Resolves once the batch is
    /// durably applied (or rejected) in commit order.
    pub async fn commit(
        &self,
        batch: Batch,
        read_set: ReadSet,
    ) -> anyhow::Result<CommitResponse> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CommitterRequest::Commit {
                batch,
                read_set,
                result: tx,
            })
            .await
            .map_err(|_| shutdown_error())?;
        rx.await.map_err(|_| shutdown_error())?
    }

    pub async fn reset(&self) -> anyhow::Result<Epoch> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CommitterRequest::Reset { result: tx })
            .await
            .map_err(|_| shutdown_error())?;
        rx.await.map_err(|_| shutdown_error())
    }
}

fn shutdown_error() -> anyhow::Error {
    ErrorMetadata::internal("Committer has shut down").into()
}

pub struct Committer {
    state: Arc<RwLock<StoreState>>,
    log: WriteLog,
    changes_tx: async_broadcast::Sender<CommitRecord>,
    stats: Arc<StatsRegistry>,
    txns: Arc<TxRegistry>,
}

impl Committer {
    pub fn start(
        state: Arc<RwLock<StoreState>>,
        log: WriteLog,
        changes_tx: async_broadcast::Sender<CommitRecord>,
        stats: Arc<StatsRegistry>,
        txns: Arc<TxRegistry>,
    ) -> CommitterClient {
        let (tx, rx) = mpsc::channel(COMMITTER_BUFFER);
        let committer = Self {
            state,
            log,
            changes_tx,
            stats,
            txns,
        };
        tokio::spawn(committer.go(rx));
        CommitterClient { sender: tx }
    }

    async fn go(self, mut rx: mpsc::Receiver<CommitterRequest>) {
        tracing::debug!("starting committer");
        while let Some(request) = rx.recv().await {
            match request {
                CommitterRequest::Commit {
                    batch,
                    read_set,
                    result,
                } => {
                    let outcome = self.apply_commit(batch, read_set);
                    let _: Result<_, _> = result.send(outcome);
                },
                CommitterRequest::Reset { result } => {
                    let epoch = self.apply_reset();
                    let _: Result<_, _> = result.send(epoch);
                },
            }
        }
        tracing::debug!("all clients have gone away, shutting down committer");
    }

    fn apply_commit(
        &self,
        batch: Batch,
        read_set: ReadSet,
    ) -> anyhow::Result<CommitResponse> {
        let mut state = self.state.write();

        for (path, observed) in &read_set {
            let current = state
                .tree
                .lookup(path)
                .and_then(|entry| entry.current_update_time());
            if current != *observed {
                tracing::debug!("conflict on {path}: observed {observed:?}, now {current:?}");
                anyhow::bail!(ErrorMetadata::conflict(format!(
                    "Document {path} changed after it was read in this transaction",
                )));
            }
        }

        let commit_version = state.commit_version.succ();
        let commit_ts = std::cmp::max(Timestamp::now(), state.last_commit_ts.succ());
        let applied = apply_batch(&state.tree, &batch, commit_ts, commit_version)?;

        let mut changes = Vec::with_capacity(applied.versions.len());
        for (path, version) in &applied.versions {
            let old = state.tree.read_document(path, state.commit_version);
            let new = version.to_document(path);
            changes.push(DocumentChange {
                path: path.clone(),
                old,
                new,
            });
        }
        for (path, version) in applied.versions {
            state.tree.apply_version(&path, version);
        }
        state.commit_version = commit_version;
        state.last_commit_ts = commit_ts;

        let record = CommitRecord {
            version: commit_version,
            timestamp: commit_ts,
            epoch: state.epoch,
            changes: Arc::new(changes),
        };
        if !record.changes.is_empty() {
            self.log.append(record.clone());
            // Slow trigger consumers overflow and miss oldest events; the
            // broadcast channel is configured to drop from the front.
            let _: Result<_, _> = self.changes_tx.try_broadcast(record);
        }

        // Prune versions no live reader can reach.
        let keep_from = self
            .txns
            .min_read_version()
            .unwrap_or(commit_version);
        state.tree.prune(keep_from);

        self.stats.record_commit(
            commit_version,
            applied.writes,
            applied.deletes,
            applied.noop_writes,
            applied.noop_deletes,
            state.tree.counts(),
        );

        Ok(CommitResponse {
            commit_version,
            write_time: commit_ts,
            results: applied.results,
        })
    }

    fn apply_reset(&self) -> Epoch {
        let mut state = self.state.write();
        state.tree.clear();
        state.epoch = state.epoch.succ();
        self.log.clear();
        self.stats.reset(state.commit_version);
        tracing::info!("instance reset, now at {}", state.epoch);
        state.epoch
    }
}
