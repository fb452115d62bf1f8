//! Paths addressing collections and documents in the hierarchical tree.
//!
//! A path is an alternating sequence of collection-id and document-id
//! segments. Document paths have even length, collection paths odd. The root
//! (length zero) is not addressable by either type.

use std::{
    fmt,
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use errors::ErrorMetadata;

fn parse_segment(kind: &str, s: &str) -> anyhow::Result<String> {
    anyhow::ensure!(
        !s.is_empty(),
        ErrorMetadata::invalid_argument(
            "InvalidResourcePath",
            format!("{kind} segments must be non-empty"),
        )
    );
    anyhow::ensure!(
        !s.contains('/'),
        ErrorMetadata::invalid_argument(
            "InvalidResourcePath",
            format!("{kind} segment {s:?} may not contain '/'"),
        )
    );
    Ok(s.to_owned())
}

/// The final segment of a collection path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CollectionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(CollectionId(parse_segment("Collection id", s)?))
    }
}

impl Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// The final segment of a document path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DocumentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(DocumentId(parse_segment("Document id", s)?))
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A path addressing a document: `collection/doc[/collection/doc]*`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The collection this document lives in.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        }
    }

    pub fn document_id(&self) -> &str {
        self.segments.last().expect("even-length path is non-empty")
    }

    /// The id of the document's collection, i.e. the second-to-last segment.
    pub fn collection_id(&self) -> &str {
        &self.segments[self.segments.len() - 2]
    }

    /// A sub-collection rooted at this document.
    pub fn child(&self, collection_id: &CollectionId) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(collection_id.as_str().to_owned());
        CollectionPath { segments }
    }

    /// Number of segments; always even and at least two.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Whether `self` is a strict ancestor document of `other` (i.e. `other`
    /// lives somewhere underneath one of this document's sub-collections).
    pub fn is_ancestor_of(&self, other: &DocumentPath) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl FromStr for DocumentPath {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> anyhow::Result<Self> {
        let segments = path
            .split('/')
            .map(|s| parse_segment("Path", s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(
            segments.len() % 2 == 0,
            ErrorMetadata::invalid_argument(
                "InvalidDocumentPath",
                format!("Document path {path:?} must have an even number of segments"),
            )
        );
        Ok(DocumentPath { segments })
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl Debug for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A path addressing a collection: an odd number of segments.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath {
    segments: Vec<String>,
}

impl CollectionPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn collection_id(&self) -> &str {
        self.segments.last().expect("odd-length path is non-empty")
    }

    /// The parent document, or `None` for a root collection.
    pub fn parent(&self) -> Option<DocumentPath> {
        if self.segments.len() == 1 {
            return None;
        }
        Some(DocumentPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// A document within this collection.
    pub fn doc(&self, document_id: &str) -> anyhow::Result<DocumentPath> {
        let id = parse_segment("Document id", document_id)?;
        let mut segments = self.segments.clone();
        segments.push(id);
        Ok(DocumentPath { segments })
    }
}

impl FromStr for CollectionPath {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> anyhow::Result<Self> {
        let segments = path
            .split('/')
            .map(|s| parse_segment("Path", s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(
            segments.len() % 2 == 1,
            ErrorMetadata::invalid_argument(
                "InvalidCollectionPath",
                format!("Collection path {path:?} must have an odd number of segments"),
            )
        );
        Ok(CollectionPath { segments })
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl Debug for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
