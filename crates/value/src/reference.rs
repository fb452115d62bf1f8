//! Database-scoped references to documents.

use std::{
    fmt,
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use errors::ErrorMetadata;

use crate::DocumentPath;

/// An absolute pointer to a document in some database:
/// `projects/<p>/databases/<db>/documents/<doc-path>`. Ordered
/// lexicographically on path segments.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    project_id: String,
    database_id: String,
    path: DocumentPath,
}

impl Reference {
    pub fn new(
        project_id: impl Into<String>,
        database_id: impl Into<String>,
        path: DocumentPath,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: database_id.into(),
            path,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        [
            "projects",
            self.project_id.as_str(),
            "databases",
            self.database_id.as_str(),
            "documents",
        ]
        .into_iter()
        .chain(self.path.segments().iter().map(|s| s.as_str()))
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments().cmp(other.segments())
    }
}

impl FromStr for Reference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let invalid = || {
            anyhow::anyhow!(ErrorMetadata::invalid_argument(
                "InvalidReference",
                format!(
                    "Reference {s:?} must look like \
                     projects/<p>/databases/<db>/documents/<path>"
                ),
            ))
        };
        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() < 7
            || segments[0] != "projects"
            || segments[2] != "databases"
            || segments[4] != "documents"
        {
            return Err(invalid());
        }
        let path: DocumentPath = segments[5..].join("/").parse().map_err(|_| invalid())?;
        Ok(Reference {
            project_id: segments[1].to_owned(),
            database_id: segments[3].to_owned(),
            path,
        })
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "projects/{}/databases/{}/documents/{}",
            self.project_id, self.database_id, self.path
        )
    }
}

impl Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
