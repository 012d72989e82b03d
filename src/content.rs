//! Content-addressed storage of distinct schema content
//!
//! Every distinct piece of content is stored once under a [`ContentId`] and
//! gets a [`GlobalId`] minted at insertion time. Identical raw text (with the
//! same references) always maps to the same content; canonical collapse only
//! happens when the caller asks for normalization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::ContentHash;
use crate::error::{RegistryError, Result};
use crate::schema::{ContentId, GlobalId, Reference, SchemaContent};
use crate::sequence::IdSequence;

/// Where a normalized registration may find an equivalent canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Only content already used by the subject's own versions
    #[default]
    Subject,
    /// Any content in the registry
    Global,
}

/// One stored content row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContent {
    pub id: ContentId,
    pub global_id: GlobalId,
    pub content: SchemaContent,
    /// References the content was registered with, in order
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// How to look for existing content
#[derive(Debug, Clone, Copy)]
pub struct ContentQuery<'a> {
    pub content: &'a SchemaContent,
    pub references: &'a [Reference],
    pub normalize: bool,
    pub scope: DedupScope,
    /// Content used by the registering subject's versions
    pub subject_contents: &'a [ContentId],
}

type IndexKey = (ContentHash, Vec<Reference>);

#[derive(Debug, Default)]
struct ContentIndex {
    contents: BTreeMap<ContentId, StoredContent>,
    by_global_id: HashMap<GlobalId, ContentId>,
    by_raw: HashMap<IndexKey, ContentId>,
    /// First content inserted for each canonical hash
    by_canonical: HashMap<IndexKey, ContentId>,
}

impl ContentIndex {
    fn lookup(&self, query: &ContentQuery<'_>) -> Option<ContentId> {
        let refs = query.references.to_vec();
        if let Some(id) = self.by_raw.get(&(query.content.content_hash.clone(), refs.clone())) {
            return Some(*id);
        }
        if !query.normalize {
            return None;
        }
        let canonical_hash = &query.content.canonical_hash;
        match query.scope {
            DedupScope::Global => self.by_canonical.get(&(canonical_hash.clone(), refs)).copied(),
            DedupScope::Subject => query.subject_contents.iter().copied().find(|id| {
                self.contents.get(id).is_some_and(|stored| {
                    stored.content.format == query.content.format
                        && stored.content.canonical_hash == *canonical_hash
                        && stored.references == query.references
                })
            }),
        }
    }

    fn insert(&mut self, stored: StoredContent) {
        let refs = stored.references.clone();
        self.by_global_id.insert(stored.global_id, stored.id);
        self.by_raw
            .entry((stored.content.content_hash.clone(), refs.clone()))
            .or_insert(stored.id);
        self.by_canonical
            .entry((stored.content.canonical_hash.clone(), refs))
            .or_insert(stored.id);
        self.contents.insert(stored.id, stored);
    }
}

/// Thread-safe content store
#[derive(Debug)]
pub struct ContentStore {
    index: RwLock<ContentIndex>,
    content_ids: Arc<dyn IdSequence>,
    global_ids: Arc<dyn IdSequence>,
}

impl ContentStore {
    pub fn new(content_ids: Arc<dyn IdSequence>, global_ids: Arc<dyn IdSequence>) -> Self {
        Self {
            index: RwLock::new(ContentIndex::default()),
            content_ids,
            global_ids,
        }
    }

    /// Rebuild a store from persisted rows; the sequences must already resume after them.
    pub fn restore(
        rows: Vec<StoredContent>,
        content_ids: Arc<dyn IdSequence>,
        global_ids: Arc<dyn IdSequence>,
    ) -> Result<Self> {
        let mut index = ContentIndex::default();
        for row in rows {
            if !row.content.verify() {
                return Err(RegistryError::CorruptSnapshot(format!(
                    "content {} does not match its hashes",
                    row.id
                )));
            }
            if index.by_global_id.contains_key(&row.global_id) || index.contents.contains_key(&row.id) {
                return Err(RegistryError::CorruptSnapshot(format!(
                    "content {} / global id {} appears twice",
                    row.id, row.global_id
                )));
            }
            index.insert(row);
        }
        Ok(Self {
            index: RwLock::new(index),
            content_ids,
            global_ids,
        })
    }

    /// Read-only lookup of equivalent content
    pub fn find(&self, query: &ContentQuery<'_>) -> Option<StoredContent> {
        let index = self.index.read();
        index.lookup(query).and_then(|id| index.contents.get(&id).cloned())
    }

    /// Store content unless equivalent content exists; returns the row either way.
    ///
    /// The lookup is repeated under the write lock so racing puts converge on
    /// the first inserted id.
    pub fn put(&self, query: &ContentQuery<'_>) -> StoredContent {
        let mut index = self.index.write();
        if let Some(existing) = index.lookup(query).and_then(|id| index.contents.get(&id).cloned()) {
            debug!(content_id = %existing.id, global_id = %existing.global_id, "content already stored");
            return existing;
        }
        let stored = StoredContent {
            id: ContentId(self.content_ids.next()),
            global_id: GlobalId(self.global_ids.next()),
            content: query.content.clone(),
            references: query.references.to_vec(),
        };
        info!(
            content_id = %stored.id,
            global_id = %stored.global_id,
            format = %stored.content.format,
            "stored new content"
        );
        index.insert(stored.clone());
        stored
    }

    pub fn get(&self, id: ContentId) -> Option<StoredContent> {
        self.index.read().contents.get(&id).cloned()
    }

    pub fn get_by_global_id(&self, id: GlobalId) -> Option<StoredContent> {
        let index = self.index.read();
        index
            .by_global_id
            .get(&id)
            .and_then(|content_id| index.contents.get(content_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows in id order
    pub fn rows(&self) -> Vec<StoredContent> {
        self.index.read().contents.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaFormat;
    use crate::sequence::AtomicSequence;

    fn store() -> ContentStore {
        ContentStore::new(Arc::new(AtomicSequence::new()), Arc::new(AtomicSequence::new()))
    }

    fn query<'a>(content: &'a SchemaContent, normalize: bool, scope: DedupScope, subject: &'a [ContentId]) -> ContentQuery<'a> {
        ContentQuery {
            content,
            references: &[],
            normalize,
            scope,
            subject_contents: subject,
        }
    }

    #[test]
    fn test_identical_raw_reuses_content() {
        let store = store();
        let content = SchemaContent::new(SchemaFormat::Json, r#"{"type":"string"}"#, r#"{"type":"string"}"#);
        let a = store.put(&query(&content, false, DedupScope::Subject, &[]));
        let b = store.put(&query(&content, false, DedupScope::Subject, &[]));
        assert_eq!(a.id, b.id);
        assert_eq!(a.global_id, b.global_id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_canonical_collapse_requires_normalize() {
        let store = store();
        let first = SchemaContent::new(SchemaFormat::Json, r#"{"type":"string"}"#, r#"{"type":"string"}"#);
        let second = SchemaContent::new(SchemaFormat::Json, r#"{ "type" : "string" }"#, r#"{"type":"string"}"#);

        let a = store.put(&query(&first, false, DedupScope::Global, &[]));
        let b = store.put(&query(&second, false, DedupScope::Global, &[]));
        assert_ne!(a.id, b.id);

        let third = SchemaContent::new(SchemaFormat::Json, "{\"type\":\n\"string\"}", r#"{"type":"string"}"#);
        let c = store.put(&query(&third, true, DedupScope::Global, &[]));
        assert_eq!(c.id, a.id, "global scope collapses onto the first canonical insert");
    }

    #[test]
    fn test_subject_scope_only_sees_subject_contents() {
        let store = store();
        let first = SchemaContent::new(SchemaFormat::Json, r#"{"type":"string"}"#, r#"{"type":"string"}"#);
        let second = SchemaContent::new(SchemaFormat::Json, r#"{ "type" : "string" }"#, r#"{"type":"string"}"#);
        let a = store.put(&query(&first, false, DedupScope::Subject, &[]));

        assert!(store.find(&query(&second, true, DedupScope::Subject, &[])).is_none());
        let found = store.find(&query(&second, true, DedupScope::Subject, &[a.id])).unwrap();
        assert_eq!(found.id, a.id);
    }

    #[test]
    fn test_global_id_lookup() {
        let store = store();
        let content = SchemaContent::new(SchemaFormat::Avro, "\"string\"", "\"string\"");
        let stored = store.put(&query(&content, false, DedupScope::Subject, &[]));
        assert_eq!(store.get_by_global_id(stored.global_id).unwrap().content, content);
        assert!(store.get_by_global_id(GlobalId(99)).is_none());
    }
}
