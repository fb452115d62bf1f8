//! The public handle to one database instance, and the pool of named
//! instances.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use common::{
    document::Document,
    query::{
        resolve_aggregate_aliases,
        AggregateKind,
        Query,
    },
    types::{
        CommitVersion,
        Epoch,
        InstanceConfig,
    },
    write::{
        Batch,
        Operation,
        WriteResult,
    },
};
use errors::ErrorMetadataAnyhowExt;
use futures::future::BoxFuture;
use parking_lot::{
    Mutex,
    RwLock,
};
use rand::Rng;
use tokio::sync::watch;
use value::{
    DocumentPath,
    Timestamp,
};

use crate::{
    committer::{
        Committer,
        CommitterClient,
        StoreState,
    },
    query::{
        execute_aggregate,
        execute_query,
        AggregateResult,
        QueryResult,
    },
    stats::{
        StatsRegistry,
        StatsSnapshot,
    },
    subscription::{
        DocumentListener,
        QueryListener,
        SubscriptionsClient,
        SubscriptionsWorker,
    },
    transaction::{
        Transaction,
        TransactionOptions,
        TxRegistry,
    },
    write_log::{
        CommitRecord,
        WriteLog,
    },
};

// Change events buffered for trigger consumers before the oldest drop.
const CHANGE_BROADCAST_BUFFER: usize = 1024;

const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(10);
const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Full-jitter delay before retrying an aborted transaction: uniform over a
/// window that doubles per failed attempt, capped at [`MAX_RETRY_BACKOFF`].
fn retry_delay(failures: u32, rng: &mut impl Rng) -> Duration {
    let window = INITIAL_RETRY_BACKOFF
        .saturating_mul(1u32 << failures.min(16))
        .min(MAX_RETRY_BACKOFF);
    window.mul_f64(rng.random::<f64>())
}

struct DatabaseInner {
    config: InstanceConfig,
    state: Arc<RwLock<StoreState>>,
    committer: CommitterClient,
    subscriptions: SubscriptionsClient,
    stats: Arc<StatsRegistry>,
    txns: Arc<TxRegistry>,
    changes_keepalive: async_broadcast::InactiveReceiver<CommitRecord>,
}

/// A single database instance. Handles are cheap to clone and share one
/// engine; the instance shuts its workers down when the last handle drops.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(config: InstanceConfig) -> Self {
        let state = Arc::new(RwLock::new(StoreState::new()));
        let log = WriteLog::new(CommitVersion::MIN);
        let (mut changes_tx, changes_rx) = async_broadcast::broadcast(CHANGE_BROADCAST_BUFFER);
        changes_tx.set_overflow(true);
        let changes_keepalive = changes_rx.deactivate();
        let stats = Arc::new(StatsRegistry::new(config.database_id.clone()));
        let txns = Arc::new(TxRegistry::new());
        let committer = Committer::start(
            state.clone(),
            log.clone(),
            changes_tx,
            stats.clone(),
            txns.clone(),
        );
        let subscriptions = SubscriptionsWorker::start(state.clone(), log.clone());
        Self {
            inner: Arc::new(DatabaseInner {
                config,
                state,
                committer,
                subscriptions,
                stats,
                txns,
                changes_keepalive,
            }),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.inner.config
    }

    pub fn commit_version(&self) -> CommitVersion {
        self.inner.state.read().commit_version
    }

    pub fn epoch(&self) -> Epoch {
        self.inner.state.read().epoch
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.inner.state.read().last_commit_ts
    }

    /// Point read at the latest committed state.
    pub async fn get(&self, path: &DocumentPath) -> anyhow::Result<Option<Document>> {
        let doc = {
            let state = self.inner.state.read();
            state.tree.read_document(path, state.commit_version)
        };
        self.inner.stats.record_read(doc.is_some());
        Ok(doc)
    }

    /// Apply one batch atomically. `results[i]` aligns with
    /// `batch.operations[i]`.
    pub async fn commit(&self, batch: Batch) -> anyhow::Result<Vec<WriteResult>> {
        let response = self.inner.committer.commit(batch, vec![]).await?;
        Ok(response.results)
    }

    /// Single-operation convenience around [`Database::commit`].
    pub async fn apply(&self, operation: Operation) -> anyhow::Result<WriteResult> {
        let mut results = self.commit(Batch::new(vec![operation])).await?;
        Ok(results.pop().expect("one result per operation"))
    }

    /// Validate, normalize, and execute a query at the latest state.
    pub async fn run_query(&self, query: Query) -> anyhow::Result<QueryResult> {
        let query = query.normalize()?;
        let state = self.inner.state.read();
        execute_query(
            &state.tree,
            state.commit_version,
            state.last_commit_ts,
            &query,
        )
    }

    /// Stream a query's rows. The snapshot is taken when the stream is
    /// created; consumers pull rows one await at a time.
    pub async fn stream_query(
        &self,
        query: Query,
    ) -> anyhow::Result<impl futures::Stream<Item = Document> + Send + Unpin + 'static> {
        let result = self.run_query(query).await?;
        Ok(futures::stream::iter(result.docs))
    }

    /// Execute an aggregation over a query at the latest state.
    pub async fn run_aggregate(
        &self,
        query: Query,
        specs: Vec<(Option<String>, AggregateKind)>,
    ) -> anyhow::Result<AggregateResult> {
        let aggregates = resolve_aggregate_aliases(specs)?;
        let query = query.normalize()?;
        let state = self.inner.state.read();
        execute_aggregate(
            &state.tree,
            state.commit_version,
            state.last_commit_ts,
            &query,
            &aggregates,
        )
    }

    pub async fn begin_transaction(
        &self,
        options: TransactionOptions,
    ) -> anyhow::Result<Transaction> {
        Transaction::new(
            &options,
            self.inner.state.clone(),
            self.inner.committer.clone(),
            self.inner.stats.clone(),
            self.inner.txns.clone(),
        )
    }

    /// Run `f` in a transaction, retrying on `ABORTED` with jittered backoff
    /// up to `options.max_attempts` attempts. Any other error propagates
    /// immediately.
    pub async fn run_transaction<T, F>(
        &self,
        options: TransactionOptions,
        mut f: F,
    ) -> anyhow::Result<T>
    where
        F: for<'a> FnMut(&'a mut Transaction) -> BoxFuture<'a, anyhow::Result<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut tx = self.begin_transaction(options).await?;
            let outcome = match f(&mut tx).await {
                Ok(value) => tx.commit().await.map(|_| value),
                Err(e) => {
                    tx.rollback();
                    Err(e)
                },
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_aborted() && attempts < options.max_attempts => {
                    let delay = retry_delay(attempts - 1, &mut rand::rng());
                    tracing::debug!(
                        "transaction aborted on attempt {attempts}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Watch one document. The first snapshot arrives asynchronously.
    pub async fn listen_document(&self, path: DocumentPath) -> anyhow::Result<DocumentListener> {
        self.inner.subscriptions.subscribe_document(path).await
    }

    /// Watch a query's result set.
    pub async fn listen_query(&self, query: Query) -> anyhow::Result<QueryListener> {
        let query = query.normalize()?;
        self.inner.subscriptions.subscribe_query(query).await
    }

    /// Raw change-stream subscription, as consumed by the trigger
    /// dispatcher. Slow consumers lose the oldest events.
    pub fn subscribe_changes(&self) -> async_broadcast::Receiver<CommitRecord> {
        self.inner.changes_keepalive.activate_cloned()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.inner.stats.subscribe()
    }

    /// Drop every document and advance the epoch. In-flight change events
    /// from before the reset are identified by their stale epoch stamp.
    pub async fn reset(&self) -> anyhow::Result<Epoch> {
        self.inner.committer.reset().await
    }

    /// Delete `path` and every descendant document beneath it, in one
    /// atomic batch. Applying it twice is equivalent to once.
    pub async fn recursive_delete(&self, path: &DocumentPath) -> anyhow::Result<u64> {
        let targets = {
            let state = self.inner.state.read();
            state.tree.descendant_documents(path, state.commit_version)
        };
        if targets.is_empty() {
            return Ok(0);
        }
        let count = targets.len() as u64;
        let operations = targets
            .into_iter()
            .map(|target| Operation::delete(target, None))
            .collect();
        self.commit(Batch::new(operations)).await?;
        Ok(count)
    }

    #[doc(hidden)]
    pub fn active_transactions(&self) -> usize {
        self.inner.txns.len()
    }
}

/// A pool of named instances keyed by `(projectId, databaseId)`.
pub struct StorePool {
    instances: Mutex<BTreeMap<(String, String), Database>>,
}

impl StorePool {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fetch the instance for the config's identity, creating it on first
    /// use.
    pub fn get_or_create(&self, config: InstanceConfig) -> Database {
        let key = (config.project_id.clone(), config.database_id.clone());
        let mut instances = self.instances.lock();
        instances
            .entry(key)
            .or_insert_with(|| Database::new(config))
            .clone()
    }

    pub fn get(&self, project_id: &str, database_id: &str) -> Option<Database> {
        self.instances
            .lock()
            .get(&(project_id.to_owned(), database_id.to_owned()))
            .cloned()
    }

    /// Remove an instance from the pool. Its workers shut down once every
    /// outstanding handle drops.
    pub fn delete(&self, project_id: &str, database_id: &str) -> bool {
        self.instances
            .lock()
            .remove(&(project_id.to_owned(), database_id.to_owned()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_bounded() {
        let mut rng = rand::rng();
        for failures in 0..32 {
            let delay = retry_delay(failures, &mut rng);
            assert!(delay <= MAX_RETRY_BACKOFF);
        }
    }
}
