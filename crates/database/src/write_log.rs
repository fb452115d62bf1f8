//! The ordered log of committed changes.
//!
//! Every successful commit appends one [`CommitRecord`]. The listener bus
//! tails the log via a watch channel on the max version; records older than
//! every consumer are trimmed by the retention pass.

use std::{
    collections::VecDeque,
    sync::Arc,
};

use common::{
    document::DocumentChange,
    types::{
        CommitVersion,
        Epoch,
    },
};
use parking_lot::Mutex;
use tokio::sync::watch;
use value::Timestamp;

/// One committed batch: its version, assigned timestamp, the epoch it was
/// produced under, and the per-document deltas.
#[derive(Clone, Debug)]
pub struct CommitRecord {
    pub version: CommitVersion,
    pub timestamp: Timestamp,
    pub epoch: Epoch,
    pub changes: Arc<Vec<DocumentChange>>,
}

struct Inner {
    records: Mutex<VecDeque<CommitRecord>>,
    max_version: watch::Sender<CommitVersion>,
}

/// Shared handle to the log. Cloning is cheap.
#[derive(Clone)]
pub struct WriteLog {
    inner: Arc<Inner>,
}

impl WriteLog {
    pub fn new(initial_version: CommitVersion) -> Self {
        let (max_version, _) = watch::channel(initial_version);
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(VecDeque::new()),
                max_version,
            }),
        }
    }

    pub fn append(&self, record: CommitRecord) {
        let version = record.version;
        {
            let mut records = self.inner.records.lock();
            debug_assert!(records
                .back()
                .map(|r| r.version < version)
                .unwrap_or(true));
            records.push_back(record);
        }
        self.inner.max_version.send_replace(version);
    }

    pub fn max_version(&self) -> CommitVersion {
        *self.inner.max_version.borrow()
    }

    /// Visit every record with `from < version <= to` in commit order.
    pub fn for_each_in(
        &self,
        from: CommitVersion,
        to: CommitVersion,
        mut f: impl FnMut(&CommitRecord),
    ) {
        let records = self.inner.records.lock();
        for record in records.iter() {
            if record.version > from && record.version <= to {
                f(record);
            }
        }
    }

    /// Wait until a record newer than `version` is appended; returns the new
    /// max.
    pub async fn wait_for_higher(&self, version: CommitVersion) -> CommitVersion {
        let mut rx = self.inner.max_version.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current > version {
                return current;
            }
            if rx.changed().await.is_err() {
                // The log outlives every sender only at shutdown; park on
                // the current max.
                return version;
            }
        }
    }

    /// Drop records every consumer has processed.
    pub fn enforce_retention(&self, keep_after: CommitVersion) {
        let mut records = self.inner.records.lock();
        while let Some(front) = records.front() {
            if front.version <= keep_after {
                records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop every record, bumping nothing. Used by reset.
    pub fn clear(&self) {
        self.inner.records.lock().clear();
    }
}
