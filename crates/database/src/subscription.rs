//! The listener bus: per-document and per-query snapshot delivery.
//!
//! A single worker task tails the write log and fans snapshots out to
//! subscribers held in a slab arena; listener handles refer to their entry
//! by key, never by pointer. Delivery queues are bounded: a subscriber that
//! cannot keep up collapses to the latest state, so the contract is eventual
//! convergence with a read time that never goes backwards.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use common::{
    document::{
        ChangeKind,
        Document,
    },
    query::Query,
    types::CommitVersion,
};
use errors::{
    ErrorCode,
    ErrorMetadata,
};
use parking_lot::RwLock;
use slab::Slab;
use tokio::sync::{
    mpsc,
    oneshot,
};
use value::{
    DocumentPath,
    MapValue,
    Timestamp,
};

use crate::{
    committer::StoreState,
    query::execute_query,
    write_log::WriteLog,
};

// Per-subscriber delivery queue depth before coalescing kicks in.
const SUBSCRIBER_BUFFER: usize = 16;
const SUBSCRIPTIONS_BUFFER: usize = 1024;

/// One delivered state of a watched document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub exists: bool,
    pub data: Option<MapValue>,
    pub create_time: Option<Timestamp>,
    pub update_time: Option<Timestamp>,
    pub read_time: Timestamp,
}

/// One entry in a query snapshot's change list. For removals the document
/// carries its last observed state.
#[derive(Clone, Debug)]
pub struct QueryChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// One delivered state of a watched query.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
    pub docs: Vec<Document>,
    pub changes: Vec<QueryChange>,
    pub read_time: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SubscriberKey {
    id: usize,
    seq: u64,
}

enum SubscriptionRequest {
    SubscribeDocument {
        path: DocumentPath,
        result: oneshot::Sender<DocumentListener>,
    },
    SubscribeQuery {
        query: Box<Query>,
        result: oneshot::Sender<QueryListener>,
    },
    Cancel(SubscriberKey),
}

#[derive(Clone)]
pub struct SubscriptionsClient {
    sender: mpsc::Sender<SubscriptionRequest>,
}

impl SubscriptionsClient {
    pub async fn subscribe_document(
        &self,
        path: DocumentPath,
    ) -> anyhow::Result<DocumentListener> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SubscriptionRequest::SubscribeDocument { path, result: tx })
            .await
            .map_err(|_| shutdown_error())?;
        rx.await.map_err(|_| shutdown_error())
    }

    /// Subscribe to a query. The query must already be normalized.
    pub async fn subscribe_query(&self, query: Query) -> anyhow::Result<QueryListener> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SubscriptionRequest::SubscribeQuery {
                query: Box::new(query),
                result: tx,
            })
            .await
            .map_err(|_| shutdown_error())?;
        rx.await.map_err(|_| shutdown_error())
    }
}

fn shutdown_error() -> anyhow::Error {
    ErrorMetadata::internal("Subscription worker has shut down").into()
}

fn timeout_error() -> anyhow::Error {
    ErrorMetadata {
        code: ErrorCode::Unknown,
        short_msg: "Timeout".into(),
        msg: "Timed out waiting for the next snapshot".into(),
    }
    .into()
}

struct CancelOnDrop {
    sender: mpsc::Sender<SubscriptionRequest>,
    key: SubscriberKey,
    cancelled: bool,
}

impl CancelOnDrop {
    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            // Best effort: the worker also notices closed channels.
            let _: Result<_, _> = self
                .sender
                .try_send(SubscriptionRequest::Cancel(self.key));
        }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Handle to a document subscription. The first snapshot arrives
/// asynchronously after subscribing; dropping the handle unsubscribes.
pub struct DocumentListener {
    rx: mpsc::Receiver<DocumentSnapshot>,
    cancel: CancelOnDrop,
}

impl DocumentListener {
    /// Next snapshot, or `None` once unsubscribed and drained.
    pub async fn next(&mut self) -> Option<DocumentSnapshot> {
        self.rx.recv().await
    }

    pub async fn next_within(&mut self, timeout: Duration) -> anyhow::Result<DocumentSnapshot> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(shutdown_error()),
            Err(_) => Err(timeout_error()),
        }
    }

    /// Idempotent; queued snapshots may still be observed, but nothing new
    /// is produced afterwards.
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to a query subscription.
pub struct QueryListener {
    rx: mpsc::Receiver<QuerySnapshot>,
    cancel: CancelOnDrop,
}

impl QueryListener {
    pub async fn next(&mut self) -> Option<QuerySnapshot> {
        self.rx.recv().await
    }

    pub async fn next_within(&mut self, timeout: Duration) -> anyhow::Result<QuerySnapshot> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(shutdown_error()),
            Err(_) => Err(timeout_error()),
        }
    }

    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
    }
}

struct DocSubscriber {
    path: DocumentPath,
    tx: mpsc::Sender<DocumentSnapshot>,
    pending: Option<DocumentSnapshot>,
    last_read_time: Timestamp,
}

struct QuerySubscriber {
    query: Query,
    tx: mpsc::Sender<QuerySnapshot>,
    pending: Option<QuerySnapshot>,
    last_docs: Vec<Document>,
    dirty: bool,
    last_read_time: Timestamp,
}

enum Subscriber {
    Doc(DocSubscriber),
    Query(QuerySubscriber),
}

struct Entry {
    seq: u64,
    subscriber: Subscriber,
}

pub struct SubscriptionsWorker {
    state: Arc<RwLock<StoreState>>,
    log: WriteLog,
    subscribers: Slab<Entry>,
    next_seq: u64,
    processed: CommitVersion,
    sender: mpsc::Sender<SubscriptionRequest>,
}

impl SubscriptionsWorker {
    pub fn start(state: Arc<RwLock<StoreState>>, log: WriteLog) -> SubscriptionsClient {
        let (tx, rx) = mpsc::channel(SUBSCRIPTIONS_BUFFER);
        let processed = log.max_version();
        let worker = Self {
            state,
            log,
            subscribers: Slab::new(),
            next_seq: 0,
            processed,
            sender: tx.clone(),
        };
        tokio::spawn(worker.go(rx));
        SubscriptionsClient { sender: tx }
    }

    async fn go(mut self, mut rx: mpsc::Receiver<SubscriptionRequest>) {
        tracing::debug!("starting subscriptions worker");
        loop {
            self.flush_pending();
            // While a coalesced snapshot waits on a full queue, wake up
            // regularly to retry; otherwise sleep until work arrives.
            let flush_delay = if self.has_pending() {
                Duration::from_millis(5)
            } else {
                Duration::from_secs(3600)
            };
            tokio::select! {
                _ = tokio::time::sleep(flush_delay) => {},
                request = rx.recv() => {
                    match request {
                        Some(SubscriptionRequest::SubscribeDocument { path, result }) => {
                            let _: Result<_, _> = result.send(self.subscribe_document(path));
                        },
                        Some(SubscriptionRequest::SubscribeQuery { query, result }) => {
                            let _: Result<_, _> = result.send(self.subscribe_query(*query));
                        },
                        Some(SubscriptionRequest::Cancel(key)) => {
                            self.remove(key);
                        },
                        None => {
                            tracing::debug!(
                                "all clients have gone away, shutting down subscriptions worker"
                            );
                            break;
                        },
                    }
                },
                next = self.log.wait_for_higher(self.processed) => {
                    if next > self.processed {
                        self.advance(next);
                    }
                },
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.subscribers.iter().any(|(_, entry)| match &entry.subscriber {
            Subscriber::Doc(sub) => sub.pending.is_some(),
            Subscriber::Query(sub) => sub.pending.is_some(),
        })
    }

    fn subscribe_document(&mut self, path: DocumentPath) -> DocumentListener {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let initial = {
            let state = self.state.read();
            let doc = state.tree.read_document(&path, state.commit_version);
            snapshot_of(doc, state.last_commit_ts)
        };
        let read_time = initial.read_time;
        let mut subscriber = DocSubscriber {
            path,
            tx,
            pending: None,
            last_read_time: read_time,
        };
        emit_doc(&mut subscriber, initial);
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.subscribers.insert(Entry {
            seq,
            subscriber: Subscriber::Doc(subscriber),
        });
        DocumentListener {
            rx,
            cancel: CancelOnDrop {
                sender: self.sender.clone(),
                key: SubscriberKey { id, seq },
                cancelled: false,
            },
        }
    }

    fn subscribe_query(&mut self, query: Query) -> QueryListener {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (docs, read_time) = {
            let state = self.state.read();
            let result = execute_query(
                &state.tree,
                state.commit_version,
                state.last_commit_ts,
                &query,
            );
            match result {
                Ok(r) => (r.docs, r.read_time),
                Err(e) => {
                    tracing::warn!("query listener evaluation failed: {e:#}");
                    (vec![], state.last_commit_ts)
                },
            }
        };
        let initial = QuerySnapshot {
            docs: docs.clone(),
            changes: docs
                .iter()
                .map(|doc| QueryChange {
                    kind: ChangeKind::Create,
                    doc: doc.clone(),
                })
                .collect(),
            read_time,
        };
        let mut subscriber = QuerySubscriber {
            query,
            tx,
            pending: None,
            last_docs: docs,
            dirty: false,
            last_read_time: read_time,
        };
        emit_query(&mut subscriber, initial);
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.subscribers.insert(Entry {
            seq,
            subscriber: Subscriber::Query(subscriber),
        });
        QueryListener {
            rx,
            cancel: CancelOnDrop {
                sender: self.sender.clone(),
                key: SubscriberKey { id, seq },
                cancelled: false,
            },
        }
    }

    fn remove(&mut self, key: SubscriberKey) {
        if let Some(entry) = self.subscribers.get(key.id) {
            if entry.seq == key.seq {
                self.subscribers.remove(key.id);
            }
        }
    }

    /// Process log records in `(processed, next]`, then re-evaluate dirty
    /// query subscribers against the latest state.
    fn advance(&mut self, next: CommitVersion) {
        let mut doc_events: Vec<(usize, DocumentSnapshot)> = Vec::new();
        self.log.for_each_in(self.processed, next, |record| {
            for change in record.changes.iter() {
                for (id, entry) in self.subscribers.iter_mut() {
                    match &mut entry.subscriber {
                        Subscriber::Doc(sub) if sub.path == change.path => {
                            doc_events.push((
                                id,
                                snapshot_of(change.new.clone(), record.timestamp),
                            ));
                        },
                        Subscriber::Doc(_) => {},
                        Subscriber::Query(sub) => {
                            sub.dirty = true;
                        },
                    }
                }
            }
        });
        for (id, snapshot) in doc_events {
            if let Some(Entry {
                subscriber: Subscriber::Doc(sub),
                ..
            }) = self.subscribers.get_mut(id)
            {
                if snapshot.read_time >= sub.last_read_time {
                    emit_doc(sub, snapshot);
                }
            }
        }

        let state = self.state.clone();
        let mut closed = Vec::new();
        for (id, entry) in self.subscribers.iter_mut() {
            let Subscriber::Query(sub) = &mut entry.subscriber else {
                continue;
            };
            if !sub.dirty {
                continue;
            }
            sub.dirty = false;
            let result = {
                let state = state.read();
                execute_query(
                    &state.tree,
                    state.commit_version,
                    state.last_commit_ts,
                    &sub.query,
                )
            };
            let Ok(result) = result else {
                continue;
            };
            if result.read_time < sub.last_read_time {
                continue;
            }
            let changes = diff_results(&sub.last_docs, &result.docs);
            if changes.is_empty() {
                continue;
            }
            sub.last_docs = result.docs.clone();
            emit_query(
                sub,
                QuerySnapshot {
                    docs: result.docs,
                    changes,
                    read_time: result.read_time,
                },
            );
            if sub.tx.is_closed() {
                closed.push(id);
            }
        }
        for id in closed {
            self.subscribers.remove(id);
        }

        self.processed = next;
        self.log.enforce_retention(next);
    }

    /// Retry coalesced snapshots and reap closed subscribers.
    fn flush_pending(&mut self) {
        let mut closed = Vec::new();
        for (id, entry) in self.subscribers.iter_mut() {
            match &mut entry.subscriber {
                Subscriber::Doc(sub) => {
                    if sub.tx.is_closed() {
                        closed.push(id);
                        continue;
                    }
                    if let Some(snapshot) = sub.pending.take() {
                        emit_doc(sub, snapshot);
                    }
                },
                Subscriber::Query(sub) => {
                    if sub.tx.is_closed() {
                        closed.push(id);
                        continue;
                    }
                    if let Some(snapshot) = sub.pending.take() {
                        emit_query(sub, snapshot);
                    }
                },
            }
        }
        for id in closed {
            self.subscribers.remove(id);
        }
    }
}

fn snapshot_of(doc: Option<Document>, read_time: Timestamp) -> DocumentSnapshot {
    match doc {
        Some(doc) => DocumentSnapshot {
            exists: true,
            create_time: Some(doc.create_time()),
            update_time: Some(doc.update_time()),
            data: Some(doc.into_data()),
            read_time,
        },
        None => DocumentSnapshot {
            exists: false,
            data: None,
            create_time: None,
            update_time: None,
            read_time,
        },
    }
}

fn emit_doc(sub: &mut DocSubscriber, snapshot: DocumentSnapshot) {
    sub.last_read_time = snapshot.read_time;
    if sub.pending.is_some() {
        sub.pending = Some(snapshot);
        return;
    }
    if let Err(mpsc::error::TrySendError::Full(snapshot)) = sub.tx.try_send(snapshot) {
        sub.pending = Some(snapshot);
    }
}

fn emit_query(sub: &mut QuerySubscriber, snapshot: QuerySnapshot) {
    sub.last_read_time = snapshot.read_time;
    if sub.pending.is_some() {
        sub.pending = Some(snapshot);
        return;
    }
    if let Err(mpsc::error::TrySendError::Full(snapshot)) = sub.tx.try_send(snapshot) {
        sub.pending = Some(snapshot);
    }
}

/// Diff two result sets keyed by path. Removed rows come first (in their
/// prior order), then adds/modifications in result order.
fn diff_results(old: &[Document], new: &[Document]) -> Vec<QueryChange> {
    let old_by_path: BTreeMap<&DocumentPath, &Document> =
        old.iter().map(|d| (d.path(), d)).collect();
    let new_by_path: BTreeMap<&DocumentPath, &Document> =
        new.iter().map(|d| (d.path(), d)).collect();
    let mut changes = Vec::new();
    for doc in old {
        if !new_by_path.contains_key(doc.path()) {
            changes.push(QueryChange {
                kind: ChangeKind::Delete,
                doc: doc.clone(),
            });
        }
    }
    for doc in new {
        match old_by_path.get(doc.path()) {
            None => changes.push(QueryChange {
                kind: ChangeKind::Create,
                doc: doc.clone(),
            }),
            Some(prior) if *prior != doc => changes.push(QueryChange {
                kind: ChangeKind::Update,
                doc: doc.clone(),
            }),
            Some(_) => {},
        }
    }
    changes
}
