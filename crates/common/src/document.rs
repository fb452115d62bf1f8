//! Documents and per-commit document deltas.

use std::fmt::{
    self,
    Debug,
};

use value::{
    DocumentPath,
    FieldPath,
    MapValue,
    Timestamp,
    Value,
};

/// An existent document: a path, its field data, and the create/update
/// times assigned by the commits that produced it. Structural placeholders
/// (path entries that only root sub-collections) are not `Document`s; they
/// surface as "missing" reads.
#[derive(Clone, PartialEq, Eq)]
pub struct Document {
    path: DocumentPath,
    data: MapValue,
    create_time: Timestamp,
    update_time: Timestamp,
}

impl Document {
    pub fn new(
        path: DocumentPath,
        data: MapValue,
        create_time: Timestamp,
        update_time: Timestamp,
    ) -> Self {
        Self {
            path,
            data,
            create_time,
            update_time,
        }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.document_id()
    }

    pub fn data(&self) -> &MapValue {
        &self.data
    }

    pub fn into_data(self) -> MapValue {
        self.data
    }

    pub fn create_time(&self) -> Timestamp {
        self.create_time
    }

    pub fn update_time(&self) -> Timestamp {
        self.update_time
    }

    /// Fetch a field by path from the document data.
    pub fn get(&self, field: &FieldPath) -> Option<&Value> {
        self.data.get_path(field)
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Document({} => {})", self.path, self.data)
    }
}

/// The kind of mutation a commit applied to one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// Per-document delta emitted by a commit: the prior and new versions of one
/// path. At least one side is always populated.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub path: DocumentPath,
    pub old: Option<Document>,
    pub new: Option<Document>,
}

impl DocumentChange {
    pub fn kind(&self) -> ChangeKind {
        match (&self.old, &self.new) {
            (None, Some(_)) => ChangeKind::Create,
            (Some(_), Some(_)) => ChangeKind::Update,
            (Some(_), None) => ChangeKind::Delete,
            (None, None) => unreachable!("change with neither old nor new document"),
        }
    }
}
