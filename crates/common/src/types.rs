//! Instance-level identifiers and configuration.

use std::fmt::{
    self,
    Display,
};

/// A per-instance counter that totally orders successful batch commits. It
/// advances by exactly one per commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitVersion(pub u64);

impl CommitVersion {
    pub const MIN: CommitVersion = CommitVersion(0);

    pub fn succ(&self) -> CommitVersion {
        CommitVersion(self.0 + 1)
    }
}

impl Display for CommitVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A per-instance counter that advances only on `reset()`. Change events are
/// stamped with the epoch they were produced under so consumers can drop
/// events that straddle a reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn succ(&self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "epoch{}", self.0)
    }
}

/// Metadata identifying a database instance. All of it is echoed in resource
/// names and change-event envelopes; none of it affects storage semantics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    pub project_id: String,
    pub database_id: String,
    pub location: String,
    pub namespace: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            project_id: "default-project".to_owned(),
            database_id: "(default)".to_owned(),
            location: "nam5".to_owned(),
            namespace: "(default)".to_owned(),
        }
    }
}

impl InstanceConfig {
    /// The resource-name prefix for documents in this instance.
    pub fn document_name_prefix(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}
