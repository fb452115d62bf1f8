//! The trigger dispatcher: routes change events to registered handlers.
//!
//! The dispatcher consumes the instance's change broadcast on a worker task.
//! For every document change it matches registered routes, constructs the
//! event payload for the handler's kind, and invokes the handler on its own
//! task. Success, failure, and timing are reported on a side channel the
//! orchestrator drains. Events stamped with an epoch older than the
//! dispatcher's bound epoch are dropped, which makes `reset()` safe without
//! quiescing in-flight commits.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use async_trait::async_trait;
use common::{
    document::{
        ChangeKind,
        Document,
    },
    types::{
        CommitVersion,
        Epoch,
    },
};
use database::{
    CommitRecord,
    Database,
};
use errors::{
    ErrorCode,
    ErrorMetadata,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use value::{
    DocumentPath,
    Timestamp,
};

use crate::routes::RouteTemplate;

/// Which change kinds a handler subscribes to. `Write` fires on all three.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Create,
    Update,
    Delete,
    Write,
}

impl TriggerKind {
    fn accepts(&self, change: ChangeKind) -> bool {
        match self {
            TriggerKind::Create => change == ChangeKind::Create,
            TriggerKind::Update => change == ChangeKind::Update,
            TriggerKind::Delete => change == ChangeKind::Delete,
            TriggerKind::Write => true,
        }
    }
}

/// The payload a handler receives for one matched change.
#[derive(Clone, Debug)]
pub struct TriggerEvent {
    pub route: String,
    pub kind: ChangeKind,
    pub path: DocumentPath,
    pub params: BTreeMap<String, String>,
    pub before: Option<Document>,
    pub after: Option<Document>,
    pub timestamp: Timestamp,
    pub commit_version: CommitVersion,
    pub epoch: Epoch,
}

#[async_trait]
pub trait TriggerHandler: Send + Sync + 'static {
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> TriggerHandler for F
where
    F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: TriggerEvent) -> anyhow::Result<()> {
        self(event).await
    }
}

/// One handler invocation's outcome, delivered on the side channel.
#[derive(Clone, Debug)]
pub struct TriggerReport {
    pub route: String,
    pub path: DocumentPath,
    pub kind: ChangeKind,
    pub outcome: Result<(), String>,
    pub elapsed: Duration,
}

/// Drains handler invocation reports. Single consumer.
pub struct ReportStream {
    rx: mpsc::UnboundedReceiver<TriggerReport>,
}

impl ReportStream {
    pub async fn next(&mut self) -> Option<TriggerReport> {
        self.rx.recv().await
    }

    pub async fn next_within(&mut self, timeout: Duration) -> anyhow::Result<TriggerReport> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(report)) => Ok(report),
            Ok(None) => Err(ErrorMetadata::internal("Dispatcher has shut down").into()),
            Err(_) => Err(timeout_error()),
        }
    }

    /// Wait for the first report matching `predicate`, discarding others.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        mut predicate: impl FnMut(&TriggerReport) -> bool,
    ) -> anyhow::Result<TriggerReport> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout_error());
            }
            let report = self.next_within(remaining).await?;
            if predicate(&report) {
                return Ok(report);
            }
        }
    }
}

fn timeout_error() -> anyhow::Error {
    ErrorMetadata {
        code: ErrorCode::Unknown,
        short_msg: "Timeout".into(),
        msg: "Timed out waiting for a trigger report".into(),
    }
    .into()
}

struct Registration {
    route: RouteTemplate,
    kind: TriggerKind,
    handler: Arc<dyn TriggerHandler>,
}

#[derive(Default)]
struct Registry {
    handlers: BTreeMap<u64, Registration>,
    next_id: u64,
}

/// Routes an instance's change stream to registered handlers.
pub struct TriggerDispatcher {
    registry: Arc<Mutex<Registry>>,
    worker: tokio::task::JoinHandle<()>,
}

impl TriggerDispatcher {
    /// Bind a dispatcher to the database's current epoch and start
    /// consuming its change stream.
    pub fn start(db: &Database) -> (Self, ReportStream) {
        Self::start_bound(db, db.epoch())
    }

    /// Bind a dispatcher to an explicit epoch. Change events stamped with an
    /// older epoch are dropped; orchestrators use this to fence out events
    /// that were in flight across a `reset()`.
    pub fn start_bound(db: &Database, bound_epoch: Epoch) -> (Self, ReportStream) {
        let registry: Arc<Mutex<Registry>> = Arc::new(Mutex::new(Registry::default()));
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let changes = db.subscribe_changes();
        let worker = tokio::spawn(run_dispatcher(
            registry.clone(),
            changes,
            report_tx,
            bound_epoch,
        ));
        (
            Self { registry, worker },
            ReportStream { rx: report_rx },
        )
    }

    /// Register a handler for a route template and change kind. Returns an
    /// id usable with [`TriggerDispatcher::unregister`].
    pub fn register(
        &self,
        route: &str,
        kind: TriggerKind,
        handler: Arc<dyn TriggerHandler>,
    ) -> anyhow::Result<u64> {
        let route: RouteTemplate = route.parse()?;
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(
            id,
            Registration {
                route,
                kind,
                handler,
            },
        );
        Ok(id)
    }

    /// Idempotent.
    pub fn unregister(&self, id: u64) {
        self.registry.lock().handlers.remove(&id);
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for TriggerDispatcher {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_dispatcher(
    registry: Arc<Mutex<Registry>>,
    mut changes: async_broadcast::Receiver<CommitRecord>,
    reports: mpsc::UnboundedSender<TriggerReport>,
    mut bound_epoch: Epoch,
) {
    tracing::debug!("starting trigger dispatcher at {bound_epoch}");
    loop {
        let record = match changes.recv().await {
            Ok(record) => record,
            Err(async_broadcast::RecvError::Overflowed(missed)) => {
                tracing::warn!("trigger dispatcher lagging, dropped {missed} change events");
                continue;
            },
            Err(async_broadcast::RecvError::Closed) => {
                tracing::debug!("change stream closed, shutting down trigger dispatcher");
                break;
            },
        };
        if record.epoch < bound_epoch {
            tracing::debug!(
                "dropping change event from stale {} (bound to {bound_epoch})",
                record.epoch
            );
            continue;
        }
        bound_epoch = record.epoch;

        for change in record.changes.iter() {
            let kind = change.kind();
            let matched: Vec<(String, BTreeMap<String, String>, Arc<dyn TriggerHandler>)> = {
                let registry = registry.lock();
                registry
                    .handlers
                    .values()
                    .filter(|registration| registration.kind.accepts(kind))
                    .filter_map(|registration| {
                        registration.route.matches(&change.path).map(|params| {
                            (
                                registration.route.to_string(),
                                params,
                                registration.handler.clone(),
                            )
                        })
                    })
                    .collect()
            };
            for (route, params, handler) in matched {
                let event = TriggerEvent {
                    route: route.clone(),
                    kind,
                    path: change.path.clone(),
                    params,
                    before: change.old.clone(),
                    after: change.new.clone(),
                    timestamp: record.timestamp,
                    commit_version: record.version,
                    epoch: record.epoch,
                };
                let reports = reports.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let path = event.path.clone();
                    let outcome = handler
                        .handle(event)
                        .await
                        .map_err(|e| format!("{e:#}"));
                    let _: Result<_, _> = reports.send(TriggerReport {
                        route,
                        path,
                        kind,
                        outcome,
                        elapsed: started.elapsed(),
                    });
                });
            }
        }
    }
}
