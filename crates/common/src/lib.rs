//! Shared model types for the document engine: documents, queries, write
//! operations, instance configuration, and their wire forms.

pub mod document;
pub mod query;
pub mod types;
pub mod wire;
pub mod write;

pub use crate::{
    document::{
        ChangeKind,
        Document,
        DocumentChange,
    },
    types::{
        CommitVersion,
        Epoch,
        InstanceConfig,
    },
};
