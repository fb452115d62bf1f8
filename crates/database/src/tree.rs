//! The hierarchical document tree and per-document version histories.
//!
//! Collections hold document entries; every entry can root sub-collections
//! of its own. An entry with no live version but non-empty sub-collections
//! is a structural placeholder: invisible to reads and queries, but its
//! descendants remain addressable and collection-group scans still find
//! them.
//!
//! Iteration order here is unspecified; ordering is the query layer's
//! responsibility.

use std::collections::BTreeMap;

use common::{
    document::Document,
    types::CommitVersion,
};
use value::{
    DocumentPath,
    MapValue,
    Timestamp,
};

/// One committed state of a document. `data: None` is a tombstone recording
/// a delete.
#[derive(Clone, Debug)]
pub struct DocVersion {
    pub data: Option<MapValue>,
    pub create_time: Timestamp,
    pub update_time: Timestamp,
    pub committed_at: CommitVersion,
}

impl DocVersion {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn to_document(&self, path: &DocumentPath) -> Option<Document> {
        let data = self.data.as_ref()?;
        Some(Document::new(
            path.clone(),
            data.clone(),
            self.create_time,
            self.update_time,
        ))
    }
}

/// A document slot: its bounded version history plus any sub-collections.
#[derive(Clone, Debug, Default)]
pub struct DocEntry {
    versions: Vec<DocVersion>,
    collections: BTreeMap<String, CollectionNode>,
}

impl DocEntry {
    pub fn latest(&self) -> Option<&DocVersion> {
        self.versions.last()
    }

    /// The update time of the current live version, or `None` if the
    /// document does not currently exist. This is the value transactions
    /// observe and re-validate at commit.
    pub fn current_update_time(&self) -> Option<Timestamp> {
        match self.latest() {
            Some(v) if v.exists() => Some(v.update_time),
            _ => None,
        }
    }

    /// The latest version committed at or before `version`.
    pub fn read_at(&self, version: CommitVersion) -> Option<&DocVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.committed_at <= version)
    }

    pub fn push_version(&mut self, version: DocVersion) {
        debug_assert!(self
            .versions
            .last()
            .map(|prev| prev.committed_at < version.committed_at)
            .unwrap_or(true));
        self.versions.push(version);
    }

    /// Drop versions no active reader can observe: everything strictly older
    /// than the latest version at or before `keep_from`. A trailing
    /// tombstone older than every reader is dropped entirely.
    fn prune(&mut self, keep_from: CommitVersion) {
        let base = self
            .versions
            .iter()
            .rposition(|v| v.committed_at <= keep_from)
            .unwrap_or(0);
        if base > 0 {
            self.versions.drain(..base);
        }
        if self.versions.len() == 1
            && !self.versions[0].exists()
            && self.versions[0].committed_at <= keep_from
        {
            self.versions.clear();
        }
    }

    fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.collections.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct CollectionNode {
    documents: BTreeMap<String, DocEntry>,
}

/// Aggregate counts over the tree at its latest state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeCounts {
    /// Entries present in the tree, structural placeholders included.
    pub documents_total: u64,
    /// Entries whose latest version is live data.
    pub documents_existent: u64,
    /// Collection nodes with at least one entry.
    pub collections_total: u64,
}

/// Path-addressed storage for every document in one instance.
#[derive(Clone, Debug, Default)]
pub struct DocumentTree {
    collections: BTreeMap<String, CollectionNode>,
}

impl DocumentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    pub fn lookup(&self, path: &DocumentPath) -> Option<&DocEntry> {
        let segments = path.segments();
        let mut collections = &self.collections;
        let mut entry = None;
        for pair in segments.chunks(2) {
            let node = collections.get(&pair[0])?;
            let e = node.documents.get(&pair[1])?;
            collections = &e.collections;
            entry = Some(e);
        }
        entry
    }

    /// Fetch the entry for `path`, materializing ancestors as structural
    /// placeholders.
    fn entry_mut(&mut self, path: &DocumentPath) -> &mut DocEntry {
        let segments = path.segments();
        let (first, rest) = segments.split_at(2);
        let node = self.collections.entry(first[0].clone()).or_default();
        let mut entry = node.documents.entry(first[1].clone()).or_default();
        for pair in rest.chunks(2) {
            let node = entry.collections.entry(pair[0].clone()).or_default();
            entry = node.documents.entry(pair[1].clone()).or_default();
        }
        entry
    }

    /// Append a version for `path`. Deletes are tombstone versions; the
    /// entry itself stays in place so sub-collections keep their root.
    pub fn apply_version(&mut self, path: &DocumentPath, version: DocVersion) {
        self.entry_mut(path).push_version(version);
    }

    /// A point-in-time read. Structural placeholders and tombstones read as
    /// missing.
    pub fn read_document(&self, path: &DocumentPath, version: CommitVersion) -> Option<Document> {
        self.lookup(path)?
            .read_at(version)?
            .to_document(path)
    }

    /// All existent documents in one collection at `version`.
    pub fn scan_collection(
        &self,
        parent: Option<&DocumentPath>,
        collection_id: &str,
        version: CommitVersion,
    ) -> Vec<Document> {
        let collections = match parent {
            None => &self.collections,
            Some(parent_path) => match self.lookup(parent_path) {
                Some(entry) => &entry.collections,
                None => return vec![],
            },
        };
        let Some(node) = collections.get(collection_id) else {
            return vec![];
        };
        let parent_display = parent.map(|p| p.to_string());
        node.documents
            .iter()
            .filter_map(|(doc_id, entry)| {
                let path_str = match &parent_display {
                    None => format!("{collection_id}/{doc_id}"),
                    Some(prefix) => format!("{prefix}/{collection_id}/{doc_id}"),
                };
                let path: DocumentPath = path_str.parse().ok()?;
                entry.read_at(version)?.to_document(&path)
            })
            .collect()
    }

    /// All existent documents in every collection named `collection_id`,
    /// anywhere in the tree, at `version`.
    pub fn scan_collection_group(
        &self,
        collection_id: &str,
        version: CommitVersion,
    ) -> Vec<Document> {
        let mut out = Vec::new();
        Self::walk_group(&self.collections, None, collection_id, version, &mut out);
        out
    }

    fn walk_group(
        collections: &BTreeMap<String, CollectionNode>,
        prefix: Option<&str>,
        collection_id: &str,
        version: CommitVersion,
        out: &mut Vec<Document>,
    ) {
        for (id, node) in collections {
            for (doc_id, entry) in &node.documents {
                let path_str = match prefix {
                    None => format!("{id}/{doc_id}"),
                    Some(prefix) => format!("{prefix}/{id}/{doc_id}"),
                };
                if id == collection_id {
                    if let Ok(path) = path_str.parse::<DocumentPath>() {
                        if let Some(doc) = entry.read_at(version).and_then(|v| v.to_document(&path))
                        {
                            out.push(doc);
                        }
                    }
                }
                Self::walk_group(&entry.collections, Some(&path_str), collection_id, version, out);
            }
        }
    }

    /// Paths of every existent document at or below `path` (itself
    /// included), at `version`. Used by recursive delete.
    pub fn descendant_documents(
        &self,
        path: &DocumentPath,
        version: CommitVersion,
    ) -> Vec<DocumentPath> {
        let mut out = Vec::new();
        if self.read_document(path, version).is_some() {
            out.push(path.clone());
        }
        if let Some(entry) = self.lookup(path) {
            Self::walk_descendants(&entry.collections, &path.to_string(), version, &mut out);
        }
        out
    }

    fn walk_descendants(
        collections: &BTreeMap<String, CollectionNode>,
        prefix: &str,
        version: CommitVersion,
        out: &mut Vec<DocumentPath>,
    ) {
        for (id, node) in collections {
            for (doc_id, entry) in &node.documents {
                let path_str = format!("{prefix}/{id}/{doc_id}");
                if let Ok(path) = path_str.parse::<DocumentPath>() {
                    if entry
                        .read_at(version)
                        .map(|v| v.exists())
                        .unwrap_or(false)
                    {
                        out.push(path);
                    }
                }
                Self::walk_descendants(&entry.collections, &path_str, version, out);
            }
        }
    }

    /// Drop version history no reader at or after `keep_from` can observe,
    /// removing entries and collection nodes that end up empty.
    pub fn prune(&mut self, keep_from: CommitVersion) {
        Self::prune_collections(&mut self.collections, keep_from);
    }

    fn prune_collections(collections: &mut BTreeMap<String, CollectionNode>, keep_from: CommitVersion) {
        collections.retain(|_, node| {
            node.documents.retain(|_, entry| {
                entry.prune(keep_from);
                Self::prune_collections(&mut entry.collections, keep_from);
                !entry.is_empty()
            });
            !node.documents.is_empty()
        });
    }

    /// Aggregate entry and collection counts at the latest committed state.
    pub fn counts(&self) -> TreeCounts {
        let mut counts = TreeCounts::default();
        Self::count_collections(&self.collections, &mut counts);
        counts
    }

    fn count_collections(collections: &BTreeMap<String, CollectionNode>, counts: &mut TreeCounts) {
        for node in collections.values() {
            if !node.documents.is_empty() {
                counts.collections_total += 1;
            }
            for entry in node.documents.values() {
                counts.documents_total += 1;
                if entry.latest().map(|v| v.exists()).unwrap_or(false) {
                    counts.documents_existent += 1;
                }
                Self::count_collections(&entry.collections, counts);
            }
        }
    }
}
